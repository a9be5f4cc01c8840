use modemlink::frame::Channel;
use modemlink::shm::{RegionLayout, DATA_START, REGION_MAGIC};
use modemlink::LinkConfig;
use serde::Serialize;

use crate::cmd::LayoutArgs;
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct RingRow {
    index: usize,
    channel: &'static str,
    size: usize,
    control_offset: usize,
    /// Application to modem.
    ap_to_cp_offset: usize,
    /// Modem to application.
    cp_to_ap_offset: usize,
    frame_overhead: usize,
}

#[derive(Serialize)]
struct LayoutOutput {
    magic: String,
    data_start: usize,
    total_len: usize,
    rings: Vec<RingRow>,
}

pub fn run(_args: LayoutArgs, format: OutputFormat, config: &LinkConfig) -> CliResult<i32> {
    let layout = config
        .layout()
        .map_err(|err| link_error("invalid ring sizes", err))?;
    let output = describe(&layout);

    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => {
            let mut t = table(&["RING", "CHANNEL", "SIZE", "CONTROL", "AP->CP", "CP->AP", "OVERHEAD"]);
            for ring in &output.rings {
                t.add_row(vec![
                    ring.index.to_string(),
                    ring.channel.to_string(),
                    ring.size.to_string(),
                    format!("0x{:x}", ring.control_offset),
                    format!("0x{:x}", ring.ap_to_cp_offset),
                    format!("0x{:x}", ring.cp_to_ap_offset),
                    ring.frame_overhead.to_string(),
                ]);
            }
            println!("{t}");
            println!("magic {} total {} bytes", output.magic, output.total_len);
        }
        OutputFormat::Pretty => {
            println!("region magic={} total_len={}", output.magic, output.total_len);
            for ring in &output.rings {
                println!(
                    "  {} {:<8} size={:<7} control=0x{:04x} ap->cp=0x{:x} cp->ap=0x{:x}",
                    ring.index,
                    ring.channel,
                    ring.size,
                    ring.control_offset,
                    ring.ap_to_cp_offset,
                    ring.cp_to_ap_offset
                );
            }
        }
    }
    Ok(SUCCESS)
}

fn describe(layout: &RegionLayout) -> LayoutOutput {
    let rings = layout
        .rings()
        .iter()
        .map(|ring| {
            let channel = Channel::from_index(ring.index);
            RingRow {
                index: ring.index,
                channel: channel.map_or("extra", Channel::name),
                size: ring.size,
                control_offset: ring.control_offset,
                ap_to_cp_offset: ring.out_offset,
                cp_to_ap_offset: ring.in_offset,
                frame_overhead: channel.map_or(0, Channel::overhead),
            }
        })
        .collect();

    LayoutOutput {
        magic: format!("0x{REGION_MAGIC:08x}"),
        data_start: DATA_START,
        total_len: layout.total_len(),
        rings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_default_layout() {
        let layout = LinkConfig::default().layout().unwrap();
        let output = describe(&layout);

        assert_eq!(output.rings.len(), 3);
        assert_eq!(output.rings[0].channel, "control");
        assert_eq!(output.rings[0].size, 8 * 1024);
        assert_eq!(output.rings[0].frame_overhead, 5);
        assert_eq!(output.rings[2].channel, "fs-relay");
        assert_eq!(output.total_len, layout.total_len());
        assert!(output.rings[0].ap_to_cp_offset >= DATA_START);
    }
}
