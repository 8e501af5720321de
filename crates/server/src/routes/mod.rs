pub mod sites;
pub mod status;
pub mod webhooks;
