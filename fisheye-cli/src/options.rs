use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};

/// Workaround for parsing the different log level
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

/// CLI host for the fisheye compositor: renders a procedural panorama
/// through a scripted lens and globe and writes the composited frame.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Options {
    /// The log level
    #[arg(short, value_enum, long, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// The lens script to load
    #[arg(long, default_value = "panini")]
    pub lens: String,

    /// The globe script to load
    #[arg(long, default_value = "cube")]
    pub globe: String,

    /// The lens script directory
    #[arg(long, default_value = "lenses")]
    pub lens_dir: PathBuf,

    /// The globe script directory
    #[arg(long, default_value = "globes")]
    pub globe_dir: PathBuf,

    /// The viewport width in pixels
    #[arg(long, default_value_t = 640usize)]
    pub width: usize,

    /// The viewport height in pixels
    #[arg(long, default_value_t = 480usize)]
    pub height: usize,

    /// The horizontal field of view in degrees
    #[arg(long, conflicts_with_all = ["vfov", "fit", "hfit", "vfit"])]
    pub hfov: Option<f64>,

    /// The vertical field of view in degrees
    #[arg(long, conflicts_with_all = ["fit", "hfit", "vfit"])]
    pub vfov: Option<f64>,

    /// Fit the lens extents to the viewport
    #[arg(long)]
    pub fit: bool,

    /// Fit the lens width to the viewport width
    #[arg(long)]
    pub hfit: bool,

    /// Fit the lens height to the viewport height
    #[arg(long)]
    pub vfit: bool,

    /// The camera pitch in degrees
    #[arg(long, default_value_t = 0f64)]
    pub pitch: f64,

    /// The camera yaw in degrees
    #[arg(long, default_value_t = 0f64)]
    pub yaw: f64,

    /// The camera roll in degrees
    #[arg(long, default_value_t = 0f64)]
    pub roll: f64,

    /// Enable the rubix diagnostic overlay
    #[arg(long)]
    pub rubix: bool,

    /// The per-frame build budget in milliseconds
    #[arg(long, default_value_t = 16.67f64)]
    pub budget_ms: f64,

    /// Additional console commands to run before rendering
    #[arg(long = "command")]
    pub commands: Vec<String>,

    /// Save each globe plate as <prefix><index>.pcx
    #[arg(long)]
    pub save_globe: Option<String>,

    /// Dump the active palette to a file named `palette`
    #[arg(long)]
    pub dump_palette: bool,

    /// The output image
    #[arg(short, long, default_value = "fisheye.png")]
    pub output: PathBuf,
}

impl Options {
    /// Returns the fov console command encoded by the options.
    pub fn fov_command(&self) -> String {
        if let Some(degrees) = self.hfov {
            format!("hfov {}", degrees)
        } else if let Some(degrees) = self.vfov {
            format!("vfov {}", degrees)
        } else if self.hfit {
            "hfit".to_owned()
        } else if self.vfit {
            "vfit".to_owned()
        } else if self.fit {
            "fit".to_owned()
        } else {
            "hfov 180".to_owned()
        }
    }

    /// Dumps the options parameter to the log.
    pub fn dump_to_log(&self) {
        info!("Log-Level: {:?}", self.log_level);

        info!("lens: {} ({:?})", self.lens, self.lens_dir);
        info!("globe: {} ({:?})", self.globe, self.globe_dir);

        info!("viewport: {}x{}", self.width, self.height);
        info!("fov: {}", self.fov_command());
        info!(
            "view angles: pitch={} yaw={} roll={}",
            self.pitch, self.yaw, self.roll
        );

        info!("rubix: {}", self.rubix);
        info!("budget: {} ms", self.budget_ms);
        info!("output: {:?}", self.output);
    }
}
