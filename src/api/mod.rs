pub mod auth;
pub mod docs;
pub mod envelope;
pub mod legacy;
pub mod rest;
