//! Route handlers, grouped by the gate they sit behind.

pub mod auth;
pub mod patients;
pub mod users;
