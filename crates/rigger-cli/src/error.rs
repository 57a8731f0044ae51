use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    ArgumentParse(#[from] clap::Error),
    #[error(transparent)]
    Source(#[from] rigger_source::SourceError),
    #[error(transparent)]
    Pipeline(#[from] rigger_engine::PipelineError),
    #[error(transparent)]
    Render(#[from] rigger_engine::RenderError),
    #[error(transparent)]
    Report(#[from] rigger_report::ReportError),
    #[error("no template source: set template-repo or template-dir in {config}")]
    NoTemplateSource { config: String },
}
