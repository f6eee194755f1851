use crate::context::{load_run_request, AppContext};
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(app: &AppContext, request_path: &Path, output_path: &Path) -> Result<()> {
    info!(
        "Generating market data snapshot at {}",
        output_path.display()
    );

    let request = load_run_request(request_path)?;
    let history = app.load_history(&request, None).await?;

    history.save_to_file(output_path)?;
    info!(
        "Market data snapshot with {} symbols successfully written to {}",
        history.symbol_count(),
        output_path.display()
    );

    Ok(())
}
