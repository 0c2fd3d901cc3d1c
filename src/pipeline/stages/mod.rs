// =============================================================================
// Declared pipeline stages, in execution order: scraping → processing →
// indices → analysis
// =============================================================================

pub mod analysis;
pub mod indices;
pub mod processing;
pub mod scraping;

use std::sync::Arc;

use crate::parse::WorkbookParser;
use crate::paths::DataPaths;

use super::stage::Stage;

/// Build the standard stage set wired against the given collaborators.
pub fn standard_stages(
    scrape_base_url: &str,
    parser: Arc<dyn WorkbookParser>,
    paths: &DataPaths,
) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(scraping::ScrapingStage::new(scrape_base_url, paths.clone())),
        Arc::new(processing::ProcessingStage::new(parser.clone(), paths.clone())),
        Arc::new(indices::IndicesStage::new(parser, paths.clone())),
        Arc::new(analysis::AnalysisStage::new(paths.clone())),
    ]
}
