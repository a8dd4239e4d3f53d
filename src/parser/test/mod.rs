
mod state_request;
mod streaming;
