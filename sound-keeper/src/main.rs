//! Sound Keeper: keeps audio outputs from powering down.
//!
//! ```text
//! sound-keeper [MODE]... [--config FILE] [--device SCOPE] [--stream KIND] [-f HZ] [-a PERCENT] ...
//! ```

mod cli;

use anyhow::Result;
use clap::Parser;
use log::info;

use sound_keeper_core::models::config::KeeperConfig;

fn exe_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

fn init_logging(level: Option<log::LevelFilter>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.format_timestamp_millis().init();
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    let exe = exe_name();
    init_logging(args.log_level(&exe));

    let config = cli::build_config(&args, &exe)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    run(config)
}

#[cfg(target_os = "windows")]
fn run(config: KeeperConfig) -> Result<()> {
    use std::sync::Arc;

    use sound_keeper_core::SoundKeeper;
    use sound_keeper_windows::{detect_quirks, ComGuard, MmDeviceEnumerator, WindowsPowerMonitor};

    let _com = ComGuard::initialize_mta()?;
    let quirks = detect_quirks(&config.quirks);
    let enumerator = Arc::new(MmDeviceEnumerator::new()?);
    let keeper = SoundKeeper::new(config, quirks, enumerator);
    console::install_stop_handler(keeper.signals())?;

    keeper.run(&mut WindowsPowerMonitor::new());
    info!("sound keeper stopped");
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run(config: KeeperConfig) -> Result<()> {
    info!("would keep {:?} devices awake with {}", config.device_scope, config.stream.kind.name());
    anyhow::bail!("sound-keeper needs the Windows audio stack")
}

#[cfg(target_os = "windows")]
mod console {
    use std::sync::{Arc, OnceLock};

    use windows::core::BOOL;
    use windows::Win32::System::Console::SetConsoleCtrlHandler;

    use sound_keeper_core::KeeperSignals;

    static SIGNALS: OnceLock<Arc<KeeperSignals>> = OnceLock::new();

    unsafe extern "system" fn on_console_event(_event: u32) -> BOOL {
        match SIGNALS.get() {
            Some(signals) => {
                signals.request_stop();
                true.into()
            }
            None => false.into(),
        }
    }

    /// Turn Ctrl+C, Ctrl+Break and console close into a control-loop stop.
    pub fn install_stop_handler(signals: Arc<KeeperSignals>) -> anyhow::Result<()> {
        if SIGNALS.set(signals).is_err() {
            anyhow::bail!("console handler already installed");
        }
        unsafe { SetConsoleCtrlHandler(Some(on_console_event), true) }?;
        Ok(())
    }
}
