use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use bowl::{Settings, Thrown, Vm};

#[derive(Parser)]
#[command(name = "bowl")]
#[command(about = "Runtime core of a small stack-oriented interpreter", long_about = None)]
struct Cli {
    /// The boot image to hand to the image loader
    boot_image: Option<PathBuf>,

    /// Path to the kernel library
    #[arg(long)]
    kernel: Option<PathBuf>,

    /// Increase verbosity (repeatable; silent by default)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings {
        boot_image: cli.boot_image,
        kernel_library: cli.kernel,
        verbosity: u64::from(cli.verbose),
    };

    env_logger::Builder::new()
        .filter_level(settings.log_level())
        .init();

    if let Err(e) = run(settings) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(settings: Settings) -> Result<(), String> {
    if let Some(path) = &settings.boot_image {
        if !path.is_file() {
            return Err(format!(
                "error: could not read boot image '{}'",
                path.display()
            ));
        }
    }

    let mut vm = Vm::with_settings(settings);

    match vm.load_configured_kernel() {
        Ok(Some(library)) => {
            log::info!(
                "kernel library loaded: {}",
                String::from_utf8_lossy(vm.heap().library_name_bytes(library))
            );
        }
        Ok(None) => {
            log::info!("no kernel library configured");
        }
        Err(thrown) => {
            return Err(render_exception_chain(&vm, thrown));
        }
    }

    log::info!(
        "bowl runtime ready ({} words in use, dictionary of {} entries)",
        vm.heap().used_words(),
        vm.heap().map_length(vm.dictionary())
    );
    Ok(())
}

/// Render an uncaught exception and its cause chain, outermost first.
fn render_exception_chain(vm: &Vm, thrown: Thrown) -> String {
    let mut out = String::new();
    let mut cursor = thrown.0;
    let mut first = true;
    while !cursor.is_null() {
        let message = vm.heap().exception_message(cursor);
        if first {
            out.push_str(&format!("uncaught exception: {}", vm.show(message)));
            first = false;
        } else {
            out.push_str(&format!("\ncaused by: {}", vm.show(message)));
        }
        cursor = vm.heap().exception_cause(cursor);
    }
    out
}
