use crate::error::BallotError;
use crate::state::State;

/// Observer of a node's lifecycle.
///
/// Both callbacks are invoked from the node's event-loop task; implementations
/// must return promptly and must not call back into the node.
pub trait Handler: Send + Sync + 'static {
    /// A state transition was committed.
    fn state_change(&self, from: State, to: State);

    /// A failure occurred inside the event loop, such as a persistence error
    /// that rolled back a transition.
    fn error(&self, error: &BallotError);
}
