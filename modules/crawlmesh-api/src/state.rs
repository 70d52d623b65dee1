//! Shared application state handed to every axum route and to the
//! broker-bound [`crawlmesh_broker::RpcEndpoint`].

use std::sync::Arc;

use crawlmesh_eventstream::Hub;

use crate::rpc::RpcServer;
use crate::token::TokenIssuer;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub issuer: Arc<dyn TokenIssuer>,
    pub rpc: Arc<RpcServer>,
}
