// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in `rpc_info` object: remote introspection of a participant's registry.

use super::json::{self, codes};
use super::proxy::{ObjectClient, RpcInterface};
use super::registry::{RpcObjectServer, WeakRegistry};
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFINITION: &str = r#"[
  {"name": "getObjects", "params": {}, "returns": "array<string>"},
  {"name": "getRPCIIDsForObject", "params": {"object": "string"}, "returns": "array<string>"},
  {"name": "getRPCInterfaceDefinition", "params": {"object": "string", "iid": "string"}, "returns": "string"}
]"#;

/// Server side of `rpc_info`, registered by every initialized `RpcService`.
pub struct ElementInfo {
    registry: WeakRegistry,
}

#[derive(Deserialize)]
struct ObjectParams {
    object: String,
}

#[derive(Deserialize)]
struct DefinitionParams {
    object: String,
    iid: String,
}

impl ElementInfo {
    pub const DEFAULT_NAME: &'static str = "rpc_info";
    pub const IID: &'static str = "rpc_info.iid";

    pub(crate) fn new(registry: WeakRegistry) -> Self {
        Self { registry }
    }
}

impl RpcObjectServer for ElementInfo {
    fn interface_id(&self) -> &str {
        Self::IID
    }

    fn interface_definition(&self) -> &str {
        DEFINITION
    }

    fn handle_request(&self, _content_type: &str, request: &str) -> Result<String> {
        let req = match json::parse_request(request) {
            Ok(req) => req,
            Err(e) => return Ok(json::error(codes::PARSE_ERROR, &e.to_string(), &Value::Null)),
        };
        let registry = self.registry.upgrade().ok_or(Error::NotInitialized)?;

        let value = match req.method.as_str() {
            "getObjects" => json!(registry.get_objects()),
            "getRPCIIDsForObject" => {
                let params: ObjectParams = match serde_json::from_value(req.params) {
                    Ok(p) => p,
                    Err(e) => {
                        return Ok(json::error(codes::INVALID_PARAMS, &e.to_string(), &req.id))
                    }
                };
                json!(registry.get_rpc_iids_for_object(&params.object))
            }
            "getRPCInterfaceDefinition" => {
                let params: DefinitionParams = match serde_json::from_value(req.params) {
                    Ok(p) => p,
                    Err(e) => {
                        return Ok(json::error(codes::INVALID_PARAMS, &e.to_string(), &req.id))
                    }
                };
                json!(registry.get_rpc_interface_definition(&params.object, &params.iid))
            }
            other => {
                return Ok(json::error(
                    codes::METHOD_NOT_FOUND,
                    &format!("unknown method '{}'", other),
                    &req.id,
                ))
            }
        };
        Ok(json::result(value, &req.id))
    }
}

/// Interface marker of `rpc_info`.
pub struct ElementInfoInterface;

impl RpcInterface for ElementInfoInterface {
    const IID: &'static str = ElementInfo::IID;
    const DEFAULT_NAME: &'static str = ElementInfo::DEFAULT_NAME;
}

/// Typed calls against a remote `rpc_info`.
pub trait ElementInfoCalls {
    fn get_objects(&self) -> Result<Vec<String>>;
    fn get_rpc_iids_for_object(&self, object: &str) -> Result<Vec<String>>;
    fn get_rpc_interface_definition(&self, object: &str, iid: &str) -> Result<String>;
}

impl ElementInfoCalls for ObjectClient {
    fn get_objects(&self) -> Result<Vec<String>> {
        let value = self.call("getObjects", json!({}))?;
        Ok(serde_json::from_value(value)?)
    }

    fn get_rpc_iids_for_object(&self, object: &str) -> Result<Vec<String>> {
        let value = self.call("getRPCIIDsForObject", json!({ "object": object }))?;
        Ok(serde_json::from_value(value)?)
    }

    fn get_rpc_interface_definition(&self, object: &str, iid: &str) -> Result<String> {
        let value = self.call(
            "getRPCInterfaceDefinition",
            json!({ "object": object, "iid": iid }),
        )?;
        Ok(serde_json::from_value(value)?)
    }
}
