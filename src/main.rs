use clap::Parser;

use log::{error, info, warn};
use std::path::Path;
use std::process::ExitCode;

use yolo_dataset_manager::config::{Command, ExportArgs, ImportArgs, ImportConfigArgs, StatsArgs};
use yolo_dataset_manager::io::{read_dataset_json, write_dataset_json};
use yolo_dataset_manager::report::write_reports;
use yolo_dataset_manager::{
    export_dataset, import_dataset_config, import_from_local, Args, ClassMap, Dataset,
    ExportOptions, ImportOptions,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn load_dataset(path: &Path) -> Result<Dataset, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("dataset file does not exist: {}", path.display()).into());
    }
    let mut dataset = read_dataset_json(path)?;
    if dataset.path.is_none() {
        dataset.path = path.parent().map(Path::to_path_buf);
    }
    Ok(dataset)
}

fn run_export(args: &ExportArgs) -> CliResult {
    let dataset = load_dataset(&args.input.dataset)?;
    let report = dataset.validate();
    for problem in &report.errors {
        warn!("{}", problem);
    }
    let options = ExportOptions::from(args);
    let written = export_dataset(&dataset, args.format, args.output.as_deref(), &options)?;
    info!("Export written to {}", written.display());
    Ok(())
}

fn run_import(args: &ImportArgs) -> CliResult {
    let classes: ClassMap = (0u32..).zip(args.classes.iter().cloned()).collect();
    let mut dataset = Dataset::new(args.name.clone(), classes);
    let options = ImportOptions {
        format: args.format,
        labels: args.labels.clone(),
        image_info: None,
    };
    import_from_local(&mut dataset, &args.images, &options)?;
    write_dataset_json(&args.output, &dataset)?;
    info!("Dataset written to {}", args.output.display());
    Ok(())
}

fn run_import_config(args: &ImportConfigArgs) -> CliResult {
    let dataset = import_dataset_config(&args.config)?;
    write_dataset_json(&args.output, &dataset)?;
    info!("Dataset written to {}", args.output.display());
    Ok(())
}

fn run_validate(dataset_path: &Path) -> CliResult {
    let dataset = load_dataset(dataset_path)?;
    let report = dataset.validate();
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    for problem in &report.errors {
        error!("{}", problem);
    }
    if !report.is_valid() {
        return Err(format!("dataset '{}' is invalid", dataset.name).into());
    }
    info!("Dataset '{}' is valid", dataset.name);
    Ok(())
}

fn run_stats(args: &StatsArgs) -> CliResult {
    let dataset = load_dataset(&args.input.dataset)?;
    let stats = dataset.stats();
    info!("Dataset '{}'", dataset.name);
    info!("Images: {}", stats.total_images);
    info!("Annotations: {}", stats.total_annotations);
    info!("Classes: {}", stats.classes);
    info!("Average annotations per image: {:.2}", stats.avg_annotations_per_image);
    for (class_id, count) in &stats.annotations_per_class {
        let name = dataset
            .classes
            .get(class_id)
            .map(String::as_str)
            .unwrap_or("<undefined>");
        info!(
            "  {} ({}): {} annotations in {} images",
            name,
            class_id,
            count,
            stats.images_per_class.get(class_id).copied().unwrap_or(0)
        );
    }

    if let Some(dir) = &args.report_dir {
        for path in write_reports(&dataset, dir)? {
            info!("Report written to {}", path.display());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = match &args.command {
        Command::Export(export_args) => run_export(export_args),
        Command::Import(import_args) => run_import(import_args),
        Command::ImportConfig(config_args) => run_import_config(config_args),
        Command::Validate(dataset_arg) => run_validate(&dataset_arg.dataset),
        Command::Stats(stats_args) => run_stats(stats_args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
