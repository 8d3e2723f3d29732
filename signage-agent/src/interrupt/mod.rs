//! Share-of-voice interrupt pacing

mod pacer;
mod state;

pub use pacer::{InterruptDecision, InterruptPacer, InterruptSignal, RankedInterrupt};
pub use state::InterruptState;
