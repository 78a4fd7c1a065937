//! Handler for custom machine image builds.

use crate::commands::{is_json, print_json};
use crate::errors::Result;
use crate::image_builder::ImageBuildState;
use crate::Engine;

pub fn handle_createami(
    engine: &Engine,
    name: &str,
    source_image: &str,
    instance_type: &str,
    format: &str,
) -> Result<()> {
    let outcome = engine.images.build(name, source_image, instance_type)?;

    if is_json(format) {
        print_json(&outcome.job);
    } else {
        match outcome.job.state {
            ImageBuildState::BuildComplete => println!(
                "Image build '{}' complete: {}",
                name,
                outcome.job.image_id.as_deref().unwrap_or("<unknown image id>")
            ),
            ImageBuildState::BuildFailed => println!("Image build '{}' failed", name),
            ImageBuildState::BuildInProgress => println!("Image build '{}' still in progress", name),
        }
    }

    // Teardown trouble is surfaced after the build result; the build state
    // itself is already settled.
    if let Some(cleanup) = outcome.cleanup_error {
        return Err(cleanup);
    }
    Ok(())
}
