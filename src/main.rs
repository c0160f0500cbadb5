use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use deep_dream::{
    compute::device::available_devices,
    dream::config::{EngineSettings, RenderConfig},
    error::{DreamError, Result},
    image_ops::fit::{fit_image, MAX_DIM, MIN_DIM},
    logging::init_logging,
    model::registry::ModelRegistry,
    noise::noise::{noise_image_with, NOISE_DECAY_DEF, NOISE_SCALE_DEF},
    worker::signals::{TaskOutcome, WorkerEvent},
    DreamController, DreamEngine,
};
use image::RgbImage;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{error, info};

/// Deep dream renderer: amplifies what a classification network sees in an image
#[derive(Parser, Debug)]
#[command(name = "deep-dream")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List compute devices
    Devices,

    /// List models, or the layers of one model
    Models {
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Write a noise image to start dreaming from
    Noise {
        #[arg(long, default_value_t = 512)]
        width: u32,

        #[arg(long, default_value_t = 512)]
        height: u32,

        #[arg(long, default_value_t = NOISE_SCALE_DEF)]
        scale: f32,

        #[arg(long, default_value_t = NOISE_DECAY_DEF)]
        decay: f32,

        #[arg(long)]
        seed: Option<u64>,

        /// Longest side allowed, sides are at least 128 pixels
        #[arg(long)]
        max_size: Option<u32>,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Render an image
    Dream {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value = "InceptionV3")]
        model: String,

        #[arg(long, default_value = "mixed3")]
        layer: String,

        /// First neuron of the range
        #[arg(long, default_value_t = 0)]
        first: usize,

        /// Last neuron of the range, defaults to the first
        #[arg(long)]
        last: Option<usize>,

        /// ImageNet class to amplify on the predictions layer, all classes when unset
        #[arg(long)]
        label: Option<usize>,

        #[arg(long, default_value = "cpu")]
        device: String,

        #[arg(long)]
        tiled: bool,

        /// Safetensors weights for the model
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Render configuration as JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Longest side the input is fitted to
        #[arg(long, default_value_t = MAX_DIM)]
        max_size: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging() {
        eprintln!("WARNING: {}", err);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:?}", err);
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Devices => {
            for device in available_devices() {
                println!("{:<10} {}", device.name, device.description);
            }
        }

        Commands::Models { model } => {
            let registry = ModelRegistry::with_defaults();
            match model {
                Some(name) => {
                    let entry = registry.get(&name)?;
                    println!("{}: {}", entry.name, entry.description);
                    for layer in (entry.layers)() {
                        println!("  {:<24} {}", layer.name, layer.width);
                    }
                }
                None => {
                    for name in registry.list_models() {
                        let entry = registry.get(name)?;
                        println!("{:<16} {}", entry.name, entry.description);
                    }
                }
            }
        }

        Commands::Noise {
            width,
            height,
            scale,
            decay,
            seed,
            max_size,
            output,
        } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let image = noise_image_with(width, height, max_size, scale, decay, &mut rng)?;
            image.save(&output)?;
            info!("{}x{} noise written to {}", image.width(), image.height(), output.display());
        }

        Commands::Dream {
            input,
            output,
            model,
            layer,
            first,
            last,
            label,
            device,
            tiled,
            weights,
            config,
            max_size,
        } => {
            let image = image::open(&input)?.to_rgb8();
            let image = fit_image(&image, MIN_DIM, max_size)?;
            let config = match config {
                Some(path) => RenderConfig::from_json_file(&path)?,
                None => RenderConfig::default(),
            };
            let settings = EngineSettings {
                device,
                model,
                layer,
                neuron_first: first,
                neuron_last: last.unwrap_or(first),
                imagenet_label: label,
                tiled,
                weights,
            };

            let (controller, events) = DreamController::new(DreamEngine::default());
            let task_id = controller.load_engine(settings)?;
            finish(&events, task_id)?;

            let task_id = controller.start_dreaming(image, config)?;
            match finish(&events, task_id)? {
                Some(result) => {
                    result.save(&output)?;
                    println!("saved {}", output.display());
                }
                None => println!("no image produced"),
            }
        }
    }

    Ok(())
}

/// Prints the events of `task_id` until it finishes.
fn finish(events: &Receiver<WorkerEvent>, task_id: usize) -> Result<Option<RgbImage>> {
    for event in events.iter() {
        if event.task_id() != task_id {
            continue;
        }
        match event {
            WorkerEvent::Started { task_name, .. } => println!("{} started", task_name),
            WorkerEvent::Progress { fraction, .. } => println!("{:>5.1}%", fraction * 100.0),
            WorkerEvent::Stopped { .. } => println!("stopping"),
            WorkerEvent::Finished { outcome, .. } => {
                return match outcome {
                    TaskOutcome::Completed(image) => Ok(image),
                    TaskOutcome::Halted(message) => {
                        println!("{}", message);
                        Ok(None)
                    }
                    TaskOutcome::Failed(message) => Err(DreamError::TaskFailed(message)),
                };
            }
        }
    }
    Err(DreamError::TaskFailed("event channel closed".to_string()))
}
