use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::catalogo::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::estudiantes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::pagos::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::horarios::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::cuentas::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
