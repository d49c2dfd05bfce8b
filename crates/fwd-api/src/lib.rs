#![forbid(unsafe_code)]

pub mod errors;
pub mod transforms;

pub use errors::ApiError;
pub use fwd_ad::Argnums;
pub use transforms::{
    JacfwdWrapped, JitWrapped, JvpWrapped, Primal, TransformResponse, ValueAndJacfwdWrapped,
};
pub use transforms::{jacfwd, jit, jvp, value_and_jacfwd};
