pub mod config;
pub mod connectors;
pub mod extensions;
pub mod indexer;
pub mod model;
pub mod search;
pub mod vocabulary;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use config::Config;
use connectors::SourceLocation;
use extensions::{AnnotationExtension, ExtensionList};
use indexer::IndexOptions;
use indexer::fields::FieldSelection;
use search::tantivy::TantivyBackend;
use vocabulary::{TermResolver, Vocabulary, VocabularyManager};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "obo2index",
    version,
    about = "Convert an OBO ontology into a search-index bulk-load file"
)]
pub struct Cli {
    /// Ontology to read: a file path or an http(s) URL
    #[arg(short = 'i', long = "obo-db-location", value_name = "PATH|URL")]
    pub obo_db_location: String,

    /// Where to write the bulk-load file (.xml for Solr XML, .json for JSON, .jsonl for JSON Lines)
    #[arg(short = 'o', long = "output-file", default_value = "out.xml")]
    pub output_file: PathBuf,

    /// Fields to index, as name[:boost],name[:boost],... (default: all)
    #[arg(short = 'f', long = "fields-to-index", value_name = "SPEC", default_value = "")]
    pub fields_to_index: String,

    /// Also load the terms into a tantivy index in this directory
    #[arg(long, value_name = "DIR")]
    pub index_dir: Option<PathBuf>,

    /// Vocabulary name, used to pick the annotation sources that apply
    #[arg(long, default_value = "hpo")]
    pub vocabulary: String,

    /// Config file (defaults to the platform config dir)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    run_with(cli)
}

pub fn run_with(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let source = SourceLocation::parse(&cli.obo_db_location)?;
    let selection = FieldSelection::parse(&cli.fields_to_index);
    tracing::debug!(selection = %selection, source = %source, "starting ingestion");

    let extensions = build_extensions(&config)?;
    let opts = IndexOptions {
        source,
        output: cli.output_file,
        selection,
        index_dir: cli.index_dir,
        vocabulary: cli.vocabulary,
        fetch_timeout: config.fetch_timeout(),
    };
    let report = indexer::run_index(&opts, &extensions)?;

    println!(
        "Wrote {} terms to {}{}",
        report.terms,
        report.output.display(),
        if report.partial {
            " (partial: source could not be read completely)"
        } else {
            ""
        }
    );
    if let Some(generation) = &report.generation {
        println!("Index generation {generation} is live");
    }
    Ok(())
}

/// Annotation extensions declared in the config, in declaration order.
pub fn build_extensions(config: &Config) -> Result<ExtensionList> {
    let mut extensions = ExtensionList::new();
    for source in &config.annotations {
        let resolver: Arc<dyn TermResolver> = match &source.resolve_index {
            Some(dir) => {
                let backend = TantivyBackend::open(dir)
                    .with_context(|| format!("opening resolver index {}", dir.display()))?;
                Arc::new(
                    Vocabulary::new(source.name.clone(), Arc::new(backend))
                        .with_config(config.service.clone()),
                )
            }
            None => {
                tracing::warn!(
                    extension = %source.name,
                    "no resolve_index configured, annotations will not be expanded"
                );
                Arc::new(VocabularyManager::new())
            }
        };
        extensions.push(Arc::new(AnnotationExtension::new(
            source.clone(),
            resolver,
            config.fetch_timeout(),
        )));
    }
    Ok(extensions)
}
