use crate::server::Server;
use privsearch_common::{
    error::PrivSearchError,
    wire::{self, Request, Response, Transport},
};
use std::sync::Arc;

/// In-process [`Transport`], talking to a shared [`Server`] through the same encoding as a network connection.
#[derive(Clone, Debug)]
pub struct LocalTransport {
    server: Arc<Server>,
}

impl LocalTransport {
    pub fn new(server: Arc<Server>) -> LocalTransport {
        LocalTransport { server }
    }
}

impl Transport for LocalTransport {
    fn round_trip(&mut self, request: Request) -> Result<Response, PrivSearchError> {
        let response = self.server.respond_bytes(&wire::encode(&request)?)?;
        wire::decode(&response)
    }
}
