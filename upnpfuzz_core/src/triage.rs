/// Replays a recorded crash against the target
pub mod replay;

mod utils;
