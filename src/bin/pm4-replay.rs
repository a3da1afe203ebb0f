// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! pm4-replay: offline tooling for PM4 streams and GCN shaders
//!
//! - `replay <capture>` runs a submission capture on a flat arena with the
//!   null renderer and prints packet statistics
//! - `disasm <file>` lists the packets of a capture or a raw command buffer
//! - `shader <file>` disassembles a GCN binary and prints its WGSL translation

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use liverpool::core::capture::SubmissionCapture;
use liverpool::core::config::GpuConfig;
use liverpool::core::gpu::ShaderStage;
use liverpool::core::pm4::{Opcode, PacketIter};
use liverpool::core::renderer::NullRenderer;
use liverpool::core::shader::{gcn, translate, ShaderHeader};
use liverpool::{GpuError, Result};

#[derive(Parser, Debug)]
#[command(name = "pm4-replay", version, about = "Replay and inspect GNM command buffers")]
struct Args {
    /// Configuration file (defaults to liverpool.toml when present)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a submission capture and print statistics
    Replay {
        capture: PathBuf,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Decode and list packets
    Disasm {
        /// Submission capture or raw little-endian command buffer
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Disassemble a GCN shader and translate it to WGSL
    Shader {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Stage::Vertex)]
        stage: Stage,
        /// Print the full translation result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Stage {
    Vertex,
    Pixel,
}

impl From<Stage> for ShaderStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Vertex => ShaderStage::Vertex,
            Stage::Pixel => ShaderStage::Pixel,
        }
    }
}

/// One decoded packet as listed by `disasm`
#[derive(Debug, Serialize)]
struct PacketLine {
    offset: usize,
    packet_type: u32,
    opcode: Option<Opcode>,
    raw_opcode: u8,
    payload: Vec<u32>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Replay { capture, json } => {
            let config = GpuConfig::resolve(args.config.as_deref())?;
            replay(&capture, config, json)
        }
        Command::Disasm { file, json } => disasm(&file, json),
        Command::Shader { file, stage, json } => shader(&file, stage.into(), json),
    }
}

fn replay(path: &Path, config: GpuConfig, json: bool) -> Result<()> {
    let capture = SubmissionCapture::load(path)?;
    log::info!(
        "Replaying {} (captured {}, {} DCB dwords, {} CCB dwords)",
        path.display(),
        capture.created,
        capture.dcb.len(),
        capture.ccb.len()
    );

    let stats = capture.replay(config, &mut NullRenderer::default())?;
    if json {
        println!("{}", to_json(&stats)?);
    } else {
        println!("packets: {}", stats.packets);
        println!("draws:   {}", stats.draws);
        println!("skipped: {}", stats.skipped);
    }
    Ok(())
}

/// Command buffer dwords from a capture or a raw file
fn command_buffer(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)?;
    if let Ok(capture) = SubmissionCapture::from_bytes(&bytes) {
        return Ok(capture.dcb);
    }
    if bytes.len() % 4 != 0 {
        log::warn!("{} is not dword-sized, ignoring trailing bytes", path.display());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn disasm(path: &Path, json: bool) -> Result<()> {
    let words = command_buffer(path)?;
    let mut lines = Vec::new();
    let mut failure = None;
    for packet in PacketIter::new(&words) {
        match packet {
            Ok(p) => lines.push(PacketLine {
                offset: p.offset,
                packet_type: p.header.packet_type,
                opcode: p.opcode(),
                raw_opcode: p.header.opcode,
                payload: p.payload.to_vec(),
            }),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    if json {
        println!("{}", to_json(&lines)?);
    } else {
        for line in &lines {
            let name = match (line.packet_type, line.opcode) {
                (0, _) => "TYPE0".to_string(),
                (_, Some(op)) => format!("{:?}", op),
                (_, None) => format!("UNKNOWN_0x{:02X}", line.raw_opcode),
            };
            let payload: Vec<String> = line.payload.iter().map(|w| format!("{:08X}", w)).collect();
            println!("{:06}: {:<24} {}", line.offset, name, payload.join(" "));
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn shader(path: &Path, stage: ShaderStage, json: bool) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let (end, hash) = match ShaderHeader::find(&bytes) {
        Some((pos, header)) => (pos & !3, header.hash),
        None => (bytes.len() & !3, 0),
    };
    let code: Vec<u32> = bytes[..end]
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let hash = if hash != 0 {
        hash
    } else {
        xxhash_rust::xxh3::xxh3_64(&bytes[..end])
    };

    let data = match translate(&code, stage, hash, &[]) {
        Ok(data) => data,
        Err(e) => {
            if let Some(partial) = e.partial() {
                eprintln!("{}", partial);
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", to_json(&data)?);
    } else {
        for line in gcn::disassemble(&code)? {
            println!("// {}", line);
        }
        println!("{}", data.wgsl);
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| GpuError::Resource(format!("JSON encode failed: {}", e)))
}
