pub mod chunk;
mod capture;

pub use chunk::{encode_wav, silence_wav, validate_wav};

pub(crate) use capture::run_capture_loop;
