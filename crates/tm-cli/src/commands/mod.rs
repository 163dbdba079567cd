//! CLI command implementations

pub(crate) mod common;
pub(crate) mod ls;
pub(crate) mod migrate;
pub(crate) mod serve;
pub(crate) mod status;
pub(crate) mod unlock;
