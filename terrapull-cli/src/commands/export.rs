//! Export command - start a server-side export of an image.

use std::sync::Arc;

use clap::Args;
use terrapull::download::export;
use terrapull::provider::RemoteImage;

use crate::commands::common::{GeometryArgs, ServiceArgs};
use crate::error::CliError;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Image identifier on the service
    pub image: String,

    /// Name for the exported asset
    pub name: String,

    /// Destination folder on the service
    #[arg(long)]
    pub folder: Option<String>,

    /// Block until the export task finishes
    #[arg(long)]
    pub wait: bool,

    #[command(flatten)]
    pub geometry: GeometryArgs,

    #[command(flatten)]
    pub service: ServiceArgs,
}

/// Run the export command.
pub fn run(args: ExportArgs) -> Result<(), CliError> {
    let options = args.geometry.to_options()?;
    let image = args.service.image(&args.image)?;

    let task = export(
        image as Arc<dyn RemoteImage>,
        args.name.clone(),
        args.folder.clone(),
        &options,
        args.wait,
    )?;

    if args.wait {
        println!("Export '{}' completed (task {})", args.name, task.id());
    } else {
        let status = task.status()?;
        println!(
            "Export '{}' started as task {} ({:?})",
            args.name,
            task.id(),
            status
        );
    }
    Ok(())
}
