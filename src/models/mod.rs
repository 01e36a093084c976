//! Request-side data models shared by the cache, the rate limiter and the
//! orchestrator.

// Author: kelexine (https://github.com/kelexine)

pub mod request;

pub use request::{
    is_valid_template_id, validate_owner_id, Caller, GenerationRequest, MAX_OWNER_ID_LEN,
    MAX_PARAMS_BYTES,
};
