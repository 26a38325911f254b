use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use teal_rs::object::Obj;
use teal_rs::reloc::{apply, validate_no_overlap};

#[derive(Parser, Debug)]
#[command(author, version, about = "Teal-32 link driver")]
struct Opts {
    /// Input object files (JSON), linked in order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Output flat binary image (little-endian)
    #[arg(short, long)]
    output: PathBuf,
    /// Base address of the image
    #[arg(long, default_value_t = 0u32)]
    base: u32,
}

/// Where one input section landed in the image.
struct Placed {
    obj: usize,
    section: usize,
    /// Absolute address of the section's first byte.
    base: u32,
}

fn align4(v: u32) -> u32 {
    (v + 3) & !3
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let objs: Vec<Obj> = opts
        .inputs
        .iter()
        .map(|p| Obj::read_json(p))
        .collect::<Result<_>>()?;

    // Section layout: all .text chunks first, then .data, each input chunk
    // 4-byte aligned. The layout step, not the applier, guarantees that no
    // two relocation writes overlap.
    let mut image: Vec<u8> = Vec::new();
    let mut placed: Vec<Placed> = Vec::new();
    for pass in [".text", ".data"] {
        for (oi, obj) in objs.iter().enumerate() {
            for (si, section) in obj.sections.iter().enumerate() {
                if section.name != pass {
                    continue;
                }
                let cursor = align4(opts.base + image.len() as u32);
                image.resize((cursor - opts.base) as usize, 0);
                placed.push(Placed { obj: oi, section: si, base: cursor });
                image.extend_from_slice(&section.bytes);
                debug!(input = %opts.inputs[oi].display(), section = %section.name, base = cursor, len = section.bytes.len(), "placed");
            }
        }
    }

    // Final symbol table: name -> absolute address.
    let mut symbols: HashMap<&str, i64> = HashMap::new();
    for p in &placed {
        let obj = &objs[p.obj];
        for sym in obj.symbols.iter().filter(|s| s.section == p.section) {
            let addr = p.base as i64 + sym.offset as i64;
            if symbols.insert(sym.name.as_str(), addr).is_some() {
                bail!(
                    "duplicate symbol `{}` (defined again in {})",
                    sym.name,
                    opts.inputs[p.obj].display()
                );
            }
        }
    }

    // Relocation application, one pass, each entry consumed exactly once.
    for p in &placed {
        let section = &objs[p.obj].sections[p.section];
        validate_no_overlap(&section.relocs).with_context(|| {
            format!(
                "section {} of {}",
                section.name,
                opts.inputs[p.obj].display()
            )
        })?;
        let start = (p.base - opts.base) as usize;
        let slice = &mut image[start..start + section.bytes.len()];
        for entry in &section.relocs {
            let value = *symbols.get(entry.symbol.as_str()).ok_or_else(|| {
                anyhow::anyhow!(
                    "undefined symbol `{}` referenced from {}",
                    entry.symbol,
                    opts.inputs[p.obj].display()
                )
            })?;
            apply(entry, value, p.base, slice).with_context(|| {
                format!(
                    "relocating {} of {}",
                    section.name,
                    opts.inputs[p.obj].display()
                )
            })?;
        }
    }

    std::fs::write(&opts.output, &image)
        .with_context(|| format!("writing {}", opts.output.display()))?;
    Ok(())
}
