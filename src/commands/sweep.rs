use crate::context::{load_run_request, load_sweep_grid, AppContext};
use crate::sweep::{print_results, run_sweep};
use anyhow::Result;
use log::info;
use std::path::Path;
use std::sync::Arc;

pub async fn run(
    app: &AppContext,
    request_path: &Path,
    grid_path: &Path,
    data_file: Option<&Path>,
) -> Result<()> {
    let request = load_run_request(request_path)?;
    let grid = load_sweep_grid(grid_path)?;
    info!(
        "Sweeping {} parameters over {} symbols ({:?} objective)",
        grid.parameters.len(),
        request.universe.len(),
        grid.objective
    );

    let history = Arc::new(app.load_history(&request, data_file).await?);
    let config = request.config.clone();
    let top_n = grid.top_n;
    let outcomes = tokio::task::spawn_blocking(move || run_sweep(history, &config, &grid)).await??;

    print_results(&outcomes, top_n);
    Ok(())
}
