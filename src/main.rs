//! Command line front end for reefmask projects.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use reefmask::format::validate_project;
use reefmask::{AppConfig, Dataset, FilterConfig, FilterHandle};

#[derive(Parser)]
#[command(name = "reefmask")]
#[command(about = "Inspect, filter and export coral reef mask projects")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print images and annotation counts of a project
    Info {
        project: PathBuf,
    },

    /// Check the archive layout without decoding images
    Validate {
        project: PathBuf,
    },

    /// Print the filtered view of one image as JSON
    Filter {
        project: PathBuf,

        /// Image index
        #[arg(long, default_value_t = 0)]
        image: usize,

        #[command(flatten)]
        thresholds: Thresholds,
    },

    /// Export every image's filtered, categorized masks as one COCO file
    Export {
        project: PathBuf,

        /// Output file (defaults to `<project stem>_coco.json` in the export folder)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        thresholds: Thresholds,
    },

    /// Copy the original image files out of a project
    ExportImages {
        project: PathBuf,

        /// Directory receiving the images
        output_dir: PathBuf,
    },

    /// Save a project under a new name in another directory
    SaveAs {
        project: PathBuf,

        /// Directory receiving `project.sat` (or the next free name)
        output_dir: PathBuf,
    },
}

/// Threshold overrides; unset values come from the stored or default settings.
#[derive(clap::Args)]
struct Thresholds {
    /// Minimum mask area as a fraction of the image
    #[arg(long)]
    min_area: Option<f64>,

    /// Maximum overlap before the smaller mask is suppressed
    #[arg(long)]
    max_iou: Option<f64>,

    /// Minimum model confidence
    #[arg(long)]
    min_confidence: Option<f64>,
}

impl Thresholds {
    fn apply(&self, base: FilterConfig) -> FilterConfig {
        FilterConfig {
            area_limit: self.min_area.unwrap_or(base.area_limit),
            iou_limit: self.max_iou.unwrap_or(base.iou_limit),
            predicted_iou_limit: self.min_confidence.unwrap_or(base.predicted_iou_limit),
        }
    }

    fn is_empty(&self) -> bool {
        self.min_area.is_none() && self.max_iou.is_none() && self.min_confidence.is_none()
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(AppConfig::load_from(path)?),
        None => Ok(AppConfig::load_from_default_path().unwrap_or_default()),
    }
}

fn open(path: &Path) -> Result<Dataset, Box<dyn std::error::Error>> {
    let mut dataset = Dataset::new();
    dataset.load_project(path)?;
    Ok(dataset)
}

fn export_path(config: &AppConfig, project: &Path) -> PathBuf {
    let stem = project
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    let name = format!("{stem}_coco.json");
    let folder = &config.preferences.export_folder;
    if folder.is_empty() {
        project.with_file_name(name)
    } else {
        Path::new(folder).join(name)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    env_logger::Builder::new()
        .filter_level(config.preferences.log_level.to_level_filter())
        .parse_default_env()
        .init();

    let defaults = FilterHandle::new(config.preferences.default_filter);

    match cli.command {
        Command::Info { project } => {
            let mut dataset = open(&project)?;
            println!("{}: {} images", project.display(), dataset.len());
            let default_filter = defaults.snapshot();
            for idx in 0..dataset.len() {
                let filter = dataset.filter_config_for(idx, &default_filter);
                let data = dataset.get_mut(idx)?;
                let kept = data.filter(&filter)?.len();
                let marker = if idx == dataset.current_index() { "*" } else { " " };
                let data = dataset.get(idx)?;
                println!(
                    "{marker} {idx:>4}  {:<32} {:>5} masks, {:>5} kept",
                    data.filename(),
                    data.annotations().len(),
                    kept
                );
            }
            for (id, name) in dataset.labels() {
                println!("  label {id}: {name}");
            }
        }
        Command::Validate { project } => {
            let summary = validate_project(&project)?;
            println!(
                "{}: {} images, {} annotations ({} categorized), {} labels",
                project.display(),
                summary.images,
                summary.annotations,
                summary.categorized,
                summary.labels
            );
        }
        Command::Filter {
            project,
            image,
            thresholds,
        } => {
            let mut dataset = open(&project)?;
            let filter = thresholds.apply(dataset.filter_config_for(image, &defaults.snapshot()));
            filter.validate()?;
            let view = dataset.get_mut(image)?.view(&filter)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Export {
            project,
            output,
            thresholds,
        } => {
            let mut dataset = open(&project)?;
            if !thresholds.is_empty() {
                // Explicit thresholds apply to every image.
                defaults.update(thresholds.apply(defaults.snapshot()))?;
                for idx in 0..dataset.len() {
                    dataset.update_filter_config(idx, defaults.snapshot())?;
                }
            }
            let doc = dataset.export_coco(&defaults.snapshot())?;
            let output = output.unwrap_or_else(|| export_path(&config, &project));
            doc.write_coco(&output)?;
            println!(
                "Wrote {} annotations from {} images to {}",
                doc.annotations.len(),
                doc.images.len(),
                output.display()
            );
        }
        Command::ExportImages {
            project,
            output_dir,
        } => {
            let written = open(&project)?.export_images(&output_dir)?;
            println!("Copied {} images to {}", written.len(), output_dir.display());
        }
        Command::SaveAs {
            project,
            output_dir,
        } => {
            let saved = open(&project)?.save_as(&output_dir)?;
            println!("Saved {} as {}", project.display(), saved.display());
        }
    }

    Ok(())
}
