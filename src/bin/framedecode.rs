use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use ffmpeg_next::codec::Id as CodecId;
use framedecode::{
    Decoder, DecoderOptions, FfmpegLogLevel, HardwareAccelerationMode, HardwareDeviceType,
    available_hardware_devices, pixel_format,
};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  framedecode devices --json\n  framedecode pixel-format nv12\n  framedecode decoder h264 --hardware vaapi --device /dev/dri/renderD128\n  framedecode completions zsh > _framedecode";

#[derive(Debug, Parser)]
#[command(
    name = "framedecode",
    version,
    about = "Inspect the decoders, hardware devices and pixel formats available to framedecode",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Let FFmpeg print informational messages.
    #[arg(long)]
    verbose: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List hardware device types and whether the linked FFmpeg supports them.
    #[command(
        about = "List hardware decoding devices",
        after_help = "Examples:\n  framedecode devices\n  framedecode devices --json"
    )]
    Devices {
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Describe the plane layout of a pixel format.
    #[command(
        about = "Describe a pixel format",
        after_help = "Examples:\n  framedecode pixel-format yuv420p\n  framedecode pixel-format bgr24 --json"
    )]
    PixelFormat {
        /// FFmpeg pixel format name.
        name: String,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Open a decoder and report which implementation was picked.
    #[command(
        about = "Try to open a decoder",
        after_help = "Examples:\n  framedecode decoder hevc\n  framedecode decoder h264 --hardware qsv"
    )]
    Decoder {
        /// Codec name (h264, hevc, mpeg4, ...).
        codec: String,
        /// Hardware device (software, qsv, cuda, vaapi, dxva2, d3d11va, videotoolbox).
        #[arg(long)]
        hardware: Option<String>,
        /// Specific adapter to open, e.g. a DRM render node.
        #[arg(long)]
        device: Option<String>,
        /// Codec worker threads.
        #[arg(long)]
        threads: Option<usize>,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_hardware_mode(value: &str) -> Option<HardwareAccelerationMode> {
    let device = match value.to_ascii_lowercase().as_str() {
        "software" | "sw" | "cpu" | "none" => return Some(HardwareAccelerationMode::Software),
        "qsv" => HardwareDeviceType::Qsv,
        "cuda" => HardwareDeviceType::Cuda,
        "vaapi" => HardwareDeviceType::Vaapi,
        "dxva2" => HardwareDeviceType::Dxva2,
        "d3d11va" => HardwareDeviceType::D3d11va,
        "videotoolbox" => HardwareDeviceType::VideoToolbox,
        _ => return None,
    };
    Some(HardwareAccelerationMode::Hardware(device))
}

fn parse_codec(value: &str) -> Option<CodecId> {
    ffmpeg_next::decoder::find_by_name(&value.to_ascii_lowercase()).map(|codec| codec.id())
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    framedecode::ffmpeg::initialize()?;

    if global.verbose {
        framedecode::set_ffmpeg_log_level(FfmpegLogLevel::Info);
    }

    if let Some(level) = &global.log_level {
        let parsed: FfmpegLogLevel = level
            .parse()
            .map_err(|_| format!("unsupported --log-level: {level}"))?;
        framedecode::set_ffmpeg_log_level(parsed);
    }

    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Devices { json } => {
            let available = available_hardware_devices();
            if json {
                let payload: Vec<_> = HardwareDeviceType::ALL
                    .iter()
                    .map(|device| {
                        json!({
                            "device": format!("{device:?}"),
                            "surface_format": format!("{:?}", device.surface_format()),
                            "available": available.contains(device),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                for device in HardwareDeviceType::ALL {
                    let status = if available.contains(&device) {
                        "available".green()
                    } else {
                        "not built".dimmed()
                    };
                    println!(
                        "{:<14} {:<14} {status}",
                        format!("{device:?}").bold(),
                        format!("{:?}", device.surface_format())
                    );
                }
            }
        }
        Commands::PixelFormat { name, json } => {
            let format = pixel_format::by_name(&name)
                .ok_or(format!("unknown pixel format: {name}"))?;
            let info = pixel_format::describe(format)
                .ok_or(format!("no descriptor for pixel format: {name}"))?;

            if json {
                let payload = json!({
                    "name": info.name,
                    "planes": info.plane_count,
                    "chroma_shift_x": info.chroma_shift_x,
                    "chroma_shift_y": info.chroma_shift_y,
                    "bytes_per_sample": info.bytes_per_sample,
                    "plane_steps": &info.plane_steps[..info.plane_count],
                    "hardware": info.hardware,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Name: {}", info.name.bold());
                if info.hardware {
                    println!("Hardware surface format (opaque, no planes)");
                } else {
                    println!("Planes: {}", info.plane_count);
                    println!(
                        "Chroma subsampling: 1/{} x 1/{}",
                        1u32 << info.chroma_shift_x,
                        1u32 << info.chroma_shift_y
                    );
                    println!("Bytes per sample: {}", info.bytes_per_sample);
                    println!("Pixel step per plane: {:?}", &info.plane_steps[..info.plane_count]);
                }
            }
        }
        Commands::Decoder {
            codec,
            hardware,
            device,
            threads,
            json,
        } => {
            let codec_id = parse_codec(&codec).ok_or(format!("unknown decoder: {codec}"))?;

            let mut options = DecoderOptions::new();
            if let Some(hardware) = &hardware {
                let mode = parse_hardware_mode(hardware)
                    .ok_or(format!("unsupported --hardware mode: {hardware}"))?;
                options = options.with_hardware_acceleration(mode);
            }
            if let Some(device) = device {
                options = options.with_device(device);
            }
            if let Some(threads) = threads {
                options = options.with_threads(threads);
            }

            let decoder = Decoder::with_options(codec_id, options)?;
            if json {
                let payload = json!({
                    "codec": format!("{:?}", decoder.codec_id()),
                    "implementation": decoder.codec_name(),
                    "hardware_accelerated": decoder.is_hardware_accelerated(),
                    "mode": format!("{:?}", decoder.hardware_acceleration()),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} {} decoder ({})",
                    "opened".green().bold(),
                    decoder.codec_name(),
                    if decoder.is_hardware_accelerated() {
                        format!("{:?}", decoder.hardware_acceleration())
                    } else {
                        "software".to_string()
                    }
                );
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framedecode", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{HardwareAccelerationMode, HardwareDeviceType, parse_hardware_mode};

    #[test]
    fn parse_hardware_mode_aliases() {
        assert_eq!(
            parse_hardware_mode("cpu"),
            Some(HardwareAccelerationMode::Software)
        );
        assert_eq!(
            parse_hardware_mode("VAAPI"),
            Some(HardwareAccelerationMode::Hardware(HardwareDeviceType::Vaapi))
        );
        assert_eq!(parse_hardware_mode("auto"), None);
    }
}
