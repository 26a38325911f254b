use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use teal_rs::decode::decode;
use teal_rs::disasm::fmt_inst;
use teal_rs::operand::Inst;

#[derive(Parser, Debug)]
#[command(author, version, about = "Teal-32 disassembler CLI", long_about = None)]
struct Opts {
    /// Input binary path
    #[arg(value_name = "BINFILE")]
    input: PathBuf,
    /// Load address for the binary in target address space
    #[arg(long, default_value_t = 0u32)]
    base: u32,
    /// Skip N bytes at start of file before loading
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Limit bytes loaded (default: to EOF after --skip)
    #[arg(long)]
    len: Option<usize>,
    /// Emit decoded records as JSON instead of a listing
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
struct Line {
    addr: u32,
    word: u32,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    inst: Option<Inst>,
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    let file = std::fs::read(&opts.input)?;
    anyhow::ensure!(opts.skip <= file.len(), "--skip exceeds file size");
    let mut payload = &file[opts.skip..];
    if let Some(lim) = opts.len {
        anyhow::ensure!(lim <= payload.len(), "--len exceeds remaining file size after skip");
        payload = &payload[..lim];
    }

    let mut lines = Vec::new();
    for (i, chunk) in payload.chunks(4).enumerate() {
        let addr = opts.base + (i as u32) * 4;
        if chunk.len() < 4 {
            for (j, b) in chunk.iter().enumerate() {
                lines.push(Line {
                    addr: addr + j as u32,
                    word: *b as u32,
                    text: format!(".byte {:#04x}", b),
                    inst: None,
                });
            }
            break;
        }
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        // A word that fails to decode is reported and the scan continues:
        // flat images mix code and data.
        let line = match decode(word) {
            Ok(inst) => Line { addr, word, text: fmt_inst(&inst), inst: Some(inst) },
            Err(_) => Line { addr, word, text: format!(".word {:#010x}", word), inst: None },
        };
        lines.push(line);
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        for l in &lines {
            println!("{:#010x}: {:08x}  {}", l.addr, l.word, l.text);
            // Visual break after anything that ends straight-line flow.
            if l.inst.as_ref().is_some_and(|i| i.op.is_terminator()) {
                println!();
            }
        }
    }
    Ok(())
}
