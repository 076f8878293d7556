use std::io::{self, Write};

use serde::Serialize;

use crate::keywords::KeywordBlob;
use crate::pipeline::{CheckResult, ProgressEvent, ProgressSink, RunResult};
use crate::stats::StatsResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_check(result: &CheckResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_stats(result: &StatsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_keywords(result: &KeywordBlob) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        let message = event.message.trim();
        match event.elapsed {
            Some(elapsed) => eprintln!("{message} ({} ms)", elapsed.as_millis()),
            None => eprintln!("{message}"),
        }
    }
}

impl TextOutput {
    pub fn print_run(result: &RunResult) {
        println!("sources: {}", result.sources.join(", "));
        print_entities(
            result.entities.files,
            result.entities.biosamples,
            result.entities.subjects,
            result.entities.collections,
        );
        println!(
            "facts: {} core, {} gene, {} protein, {} pubchem",
            result.core_facts, result.gene_facts, result.protein_facts, result.pubchem_facts
        );
        println!(
            "closures: {} project pairs, {} collection pairs, {} root projects",
            result.project_in_project_transitive,
            result.collection_in_collection_transitive,
            result.project_roots
        );
        match &result.output {
            Some(output) => println!("written to {output}"),
            None => println!("dry run: nothing written"),
        }
    }

    pub fn print_check(result: &CheckResult) {
        println!("sources: {}", result.sources.join(", "));
        print_entities(
            result.entities.files,
            result.entities.biosamples,
            result.entities.subjects,
            result.entities.collections,
        );
        println!(
            "closures: {} project pairs, {} collection pairs, {} root projects",
            result.project_in_project_transitive,
            result.collection_in_collection_transitive,
            result.project_roots
        );
        println!("ok");
    }

    pub fn print_stats(result: &StatsResult) {
        let mut header = vec!["dcc".to_string()];
        header.extend(result.dimensions.iter().map(ToString::to_string));
        header.extend(
            ["files", "biosamples", "subjects", "bytes"]
                .iter()
                .map(ToString::to_string),
        );
        println!("{}", header.join("\t"));
        for row in &result.rows {
            let mut cells = vec![row.dcc.clone().unwrap_or_else(|| "-".to_string())];
            cells.extend(
                row.values
                    .iter()
                    .map(|value| value.clone().unwrap_or_else(|| "-".to_string())),
            );
            cells.extend([
                row.num_files.to_string(),
                row.num_biosamples.to_string(),
                row.num_subjects.to_string(),
                row.total_size_in_bytes.to_string(),
            ]);
            println!("{}", cells.join("\t"));
        }
    }

    pub fn print_keywords(result: &KeywordBlob) {
        println!("{} {}", result.kind, result.id);
        println!("{}", result.text());
    }
}

fn print_entities(files: usize, biosamples: usize, subjects: usize, collections: usize) {
    println!(
        "entities: {files} files, {biosamples} biosamples, {subjects} subjects, {collections} collections"
    );
}
