//! MCP (Model Context Protocol) server for the peripheral board.
//!
//! Exposes the board as a JSON-RPC 2.0 server over stdin/stdout so
//! scripts and agents can drive it headlessly: poke ports, advance
//! time, load media, and capture snapshots. There is no window and no
//! audio output.
//!
//! # Protocol
//!
//! Reads newline-delimited JSON-RPC 2.0 requests from stdin, writes
//! responses to stdout.

use std::io::{self, BufRead, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use wd_1793::Floppy;

use crate::{CassetteStatus, Speed, Trs80Config, Trs80Model3};

// ---------------------------------------------------------------------------
// JSON-RPC types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: JsonValue, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }
}

const ERR_INVALID_PARAMS: i32 = -32602;
const ERR_NO_MACHINE: i32 = -32002;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// MCP server wrapping a headless peripheral board.
#[derive(Default)]
pub struct McpServer {
    machine: Option<Trs80Model3>,
}

impl McpServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the server loop: read JSON-RPC from stdin, write responses
    /// to stdout.
    pub fn run(&mut self) {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<RpcRequest>(line) {
                Ok(request) if request.jsonrpc == "2.0" => {
                    self.dispatch(&request.method, &request.params, request.id.clone())
                }
                Ok(request) => RpcResponse::error(
                    request.id,
                    -32600,
                    "Invalid JSON-RPC version".to_string(),
                ),
                Err(e) => RpcResponse::error(JsonValue::Null, -32700, format!("Parse error: {e}")),
            };

            let _ = writeln!(
                stdout,
                "{}",
                serde_json::to_string(&response).unwrap_or_default()
            );
            let _ = stdout.flush();
        }
    }

    /// Dispatch a method call to the appropriate handler.
    fn dispatch(&mut self, method: &str, params: &JsonValue, id: JsonValue) -> RpcResponse {
        match method {
            "create" => self.handle_create(params, id),
            _ => {
                let Some(machine) = self.machine.as_mut() else {
                    return RpcResponse::error(
                        id,
                        ERR_NO_MACHINE,
                        "No machine: call create first".to_string(),
                    );
                };
                match handle(machine, method, params) {
                    Ok(result) => RpcResponse::success(id, result),
                    Err((code, message)) => RpcResponse::error(id, code, message),
                }
            }
        }
    }

    fn handle_create(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let mut config = Trs80Config::default();
        if let Some(n) = params.get("num_drives").and_then(JsonValue::as_u64) {
            config.num_drives = n.min(4) as usize;
        }
        self.machine = Some(Trs80Model3::new(config));
        RpcResponse::success(id, json!({"status": "ok"}))
    }
}

type HandlerResult = Result<JsonValue, (i32, String)>;

fn handle(machine: &mut Trs80Model3, method: &str, params: &JsonValue) -> HandlerResult {
    match method {
        "run_ticks" => {
            let ticks = param_u64(params, "ticks")?;
            machine.run_for(ticks);
            Ok(json!({"tick_count": machine.clock.tick_count()}))
        }
        "run_micros" => {
            let micros = param_u64(params, "micros")?;
            machine.run_micros(micros);
            Ok(json!({"tick_count": machine.clock.tick_count()}))
        }
        "io_read" => {
            let port = param_u64(params, "port")? as u8;
            Ok(json!({"value": machine.io_read(port)}))
        }
        "io_write" => {
            let port = param_u64(params, "port")? as u8;
            let value = param_u64(params, "value")? as u8;
            machine.io_write(port, value);
            Ok(json!({"status": "ok"}))
        }
        "status" => Ok(status_json(machine)),
        "interrupts" => Ok(interrupts_json(machine)),
        "interrupts_clear" => {
            machine.latches.clear_all();
            Ok(json!({"status": "ok"}))
        }

        "tape_insert" => {
            let data = param_base64(params, "data")?;
            machine.insert_tape(data);
            Ok(json!({"status": "ok"}))
        }
        "tape_blank" => {
            machine.insert_blank_tape();
            Ok(json!({"status": "ok"}))
        }
        "tape_play" => {
            machine.cassette_play();
            Ok(json!({"status": "ok"}))
        }
        "tape_record" => {
            machine.cassette_record();
            Ok(json!({"status": "ok"}))
        }
        "tape_stop" => {
            machine.cassette_stop();
            Ok(json!({"status": "ok"}))
        }
        "tape_rewind" => {
            machine.cassette_rewind();
            Ok(json!({"status": "ok"}))
        }
        "tape_eject" => {
            let data = machine.eject_tape();
            Ok(json!({"data": BASE64.encode(data)}))
        }
        "tape_data" => Ok(json!({"data": BASE64.encode(machine.cassette.data())})),

        "disk_insert_blank" | "disk_insert_formatted" => {
            let drive = param_u64(params, "drive")? as usize;
            let tracks = params.get("tracks").and_then(JsonValue::as_u64).unwrap_or(40) as u8;
            let sides = params.get("sides").and_then(JsonValue::as_u64).unwrap_or(1) as u8;
            let double_density = params
                .get("double_density")
                .and_then(JsonValue::as_bool)
                .unwrap_or(true);
            let floppy = if method == "disk_insert_blank" {
                Floppy::blank(tracks, sides, double_density)
            } else {
                Floppy::formatted(tracks, sides, double_density)
            };
            machine.insert_floppy(drive, floppy);
            Ok(json!({"status": "ok"}))
        }
        "disk_eject" => {
            let drive = param_u64(params, "drive")? as usize;
            let ejected = machine.eject_floppy(drive).is_some();
            Ok(json!({"ejected": ejected}))
        }
        "disk_write_protect" => {
            let drive = param_u64(params, "drive")? as usize;
            let protected = params
                .get("protected")
                .and_then(JsonValue::as_bool)
                .unwrap_or(true);
            machine.set_drive_write_protected(drive, protected);
            Ok(json!({"status": "ok"}))
        }

        "snapshot_save" => Ok(json!({"data": BASE64.encode(machine.save_snapshot())})),
        "snapshot_load" => {
            let data = param_base64(params, "data")?;
            machine
                .load_snapshot(&data)
                .map_err(|e| (ERR_INVALID_PARAMS, e))?;
            Ok(json!({"status": "ok"}))
        }

        _ => Err((-32601, format!("Unknown method: {method}"))),
    }
}

fn param_u64(params: &JsonValue, name: &str) -> Result<u64, (i32, String)> {
    params
        .get(name)
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| (ERR_INVALID_PARAMS, format!("Missing parameter: {name}")))
}

fn param_base64(params: &JsonValue, name: &str) -> Result<Vec<u8>, (i32, String)> {
    let text = params
        .get(name)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| (ERR_INVALID_PARAMS, format!("Missing parameter: {name}")))?;
    BASE64
        .decode(text)
        .map_err(|e| (ERR_INVALID_PARAMS, format!("Bad base64 in {name}: {e}")))
}

fn status_json(machine: &Trs80Model3) -> JsonValue {
    let cassette_status = match machine.cassette.status() {
        CassetteStatus::Reading => "reading",
        CassetteStatus::ReadEngaged => "read_engaged",
        CassetteStatus::Writing => "writing",
        CassetteStatus::WriteEngaged => "write_engaged",
        CassetteStatus::Waiting => "waiting",
        CassetteStatus::Stopped => "stopped",
    };
    json!({
        "tick_count": machine.clock.tick_count(),
        "cpu_waiting": machine.clock.is_waiting(),
        "fdc": {
            "busy": machine.fdc.busy(),
            "drq": machine.fdc.drq(),
            "motor_on": machine.fdc.motor_on(),
            "track_register": machine.fdc.track_register(),
            "sector_register": machine.fdc.sector_register(),
            "data_register": machine.fdc.data_register(),
            "current_drive": machine.fdc.current_drive(),
            "double_density": machine.fdc.double_density(),
            "status_register": machine.fdc.read_status(&machine.clock),
        },
        "cassette": {
            "status": cassette_status,
            "speed": match machine.cassette.speed() {
                Speed::Low => "low",
                Speed::High => "high",
            },
            "byte_cursor": machine.cassette.byte_cursor(),
            "bit_cursor": machine.cassette.bit_cursor(),
            "length": machine.cassette.data().len(),
            "blank": machine.cassette.is_blank(),
            "changed": machine.cassette.changed(),
        },
    })
}

fn interrupts_json(machine: &Trs80Model3) -> JsonValue {
    json!({
        "nmi_pending": machine.latches.nmi_pending(),
        "interrupt_pending": machine.latches.interrupt_pending(),
        "fdc_nmi": machine.latches.fdc_nmi.is_latched(),
        "fdc_motor_off_nmi": machine.latches.fdc_motor_off_nmi.is_latched(),
        "cassette_rising_edge": machine.latches.cassette_rising_edge.is_latched(),
        "cassette_falling_edge": machine.latches.cassette_falling_edge.is_latched(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(server: &mut McpServer, method: &str, params: JsonValue) -> Result<JsonValue, String> {
        let response = server.dispatch(method, &params, json!(1));
        match (response.result, response.error) {
            (Some(result), None) => Ok(result),
            (_, Some(err)) => Err(err.message),
            _ => Err("empty response".to_string()),
        }
    }

    #[test]
    fn requires_create_first() {
        let mut server = McpServer::new();
        let err = call(&mut server, "status", json!({})).unwrap_err();
        assert!(err.contains("create"));
    }

    #[test]
    fn create_then_drive_ports() {
        let mut server = McpServer::new();
        call(&mut server, "create", json!({})).expect("create");
        call(
            &mut server,
            "disk_insert_formatted",
            json!({"drive": 0, "double_density": true}),
        )
        .expect("insert");

        // Select drive 0 double density, spin up, read status.
        call(&mut server, "io_write", json!({"port": 0xF4, "value": 0x81})).expect("select");
        call(&mut server, "run_micros", json!({"micros": 20})).expect("run");
        let status = call(&mut server, "status", json!({})).expect("status");
        assert_eq!(status["fdc"]["motor_on"], json!(true));
    }

    #[test]
    fn tape_round_trips_through_base64() {
        let mut server = McpServer::new();
        call(&mut server, "create", json!({})).expect("create");
        let data = BASE64.encode([1u8, 2, 3, 4]);
        call(&mut server, "tape_insert", json!({"data": data})).expect("insert");
        let out = call(&mut server, "tape_data", json!({})).expect("data");
        let bytes = BASE64
            .decode(out["data"].as_str().expect("data field"))
            .expect("decode");
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn snapshot_save_load_cycle() {
        let mut server = McpServer::new();
        call(&mut server, "create", json!({})).expect("create");
        call(&mut server, "run_micros", json!({"micros": 500})).expect("run");
        let saved = call(&mut server, "snapshot_save", json!({})).expect("save");
        let tick_before = call(&mut server, "status", json!({})).expect("status")["tick_count"]
            .as_u64()
            .expect("ticks");

        call(&mut server, "run_micros", json!({"micros": 500})).expect("run");
        call(
            &mut server,
            "snapshot_load",
            json!({"data": saved["data"]}),
        )
        .expect("load");
        let tick_after = call(&mut server, "status", json!({})).expect("status")["tick_count"]
            .as_u64()
            .expect("ticks");
        assert_eq!(tick_before, tick_after);
    }

    #[test]
    fn unknown_method_errors() {
        let mut server = McpServer::new();
        call(&mut server, "create", json!({})).expect("create");
        let err = call(&mut server, "reboot_universe", json!({})).unwrap_err();
        assert!(err.contains("Unknown method"));
    }
}
