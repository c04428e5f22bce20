//! Real-time inference and sampling for Piano Genie: a small recurrent
//! decoder that turns presses on a handful of buttons into piano notes.

pub mod cache;
pub mod config;
pub mod keyboard;
pub mod model;
pub mod operator;
pub mod registry;
pub mod sampler;
pub mod session;
pub mod state;
pub mod tensor;
pub mod weights;

mod error;

pub use error::GenieError;
pub use error::Result;

pub use model::Model;
pub use registry::{GenieConfig, UserParameters};
pub use sampler::{Sampler, SamplingType};
pub use session::{Frontend, Genie, PianoView};

pub type Float = f32;
