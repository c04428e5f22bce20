use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenieError {
    #[error("model not initialized")]
    NotInitialized,

    #[error("batch size mismatch: state holds {expected} items, {what} has {got}")]
    BatchMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("need to specify either a weights URI or static weights")]
    MissingWeights,

    #[error("missing weight tensor `{0}`")]
    MissingWeight(String),

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("index {index} out of range for batch of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("model config requires {0} but none were given")]
    MissingInput(&'static str),

    #[error("invalid {what} {value} (expected 0..{limit})")]
    InvalidInput {
        what: &'static str,
        value: i64,
        limit: usize,
    },

    #[error("button {button} out of range for {num_buttons} buttons")]
    InvalidButton { button: usize, num_buttons: usize },

    #[error("unknown sampling type `{0}`")]
    UnknownSamplingType(String),

    #[error("invalid user parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f32 },

    #[error("unknown config `{0}`")]
    UnknownConfig(String),

    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    #[error("bad weights manifest: {0}")]
    Manifest(String),

    #[error("failed to read")]
    Reader(#[from] std::io::Error),

    #[error("failed to parse json")]
    Json(#[from] serde_json::Error),

    #[error("failed to fetch weights")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, GenieError>;
