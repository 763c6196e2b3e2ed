//! Chained text splitter: a parser configuration holds independent
//! processes, each an ordered pipeline of steps. Processes run against the
//! whole document and their outputs concatenate in declaration order; within
//! a process, every step consumes the chunk list the previous step produced.

mod steps;

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use common::{
    config::{ParserConfig, SplitStrategy, StepConfig},
    error::PipelineError,
    types::{Document, DocumentChunk},
};

pub struct TextSplitter {
    config: ParserConfig,
    /// Compiled pattern per (process, step); `None` for non-regex steps.
    compiled: Vec<Vec<Option<Regex>>>,
}

impl TextSplitter {
    /// Compile every regex step up front so pattern errors surface before
    /// any document is touched.
    pub fn new(config: ParserConfig) -> Result<Self, PipelineError> {
        let mut compiled = Vec::with_capacity(config.processes.len());
        for process in &config.processes {
            let mut process_patterns = Vec::with_capacity(process.steps.len());
            for step in &process.steps {
                if step.strategy == SplitStrategy::Regex {
                    let pattern = step.regex_pattern.as_deref().ok_or_else(|| {
                        PipelineError::ConfigInvalid(format!(
                            "process `{}`: regex step without `regex_pattern`",
                            process.name
                        ))
                    })?;
                    let regex = RegexBuilder::new(pattern)
                        .case_insensitive(step.ignore_case)
                        .build()?;
                    process_patterns.push(Some(regex));
                } else {
                    process_patterns.push(None);
                }
            }
            compiled.push(process_patterns);
        }
        Ok(Self { config, compiled })
    }

    /// Split one document into ordered chunks. Chunk ids are assigned from
    /// the final ordering so identical input and configuration reproduce
    /// identical ids.
    pub fn split_document(&self, document: &Document) -> Vec<DocumentChunk> {
        info!(document = document.name.as_str(), "Splitting document");

        let mut all_chunks = Vec::new();
        for (process_index, process) in self.config.processes.iter().enumerate() {
            let mut chunks = vec![DocumentChunk::new(document.text.clone(), document.clone())];
            for (step_index, step) in process.steps.iter().enumerate() {
                let pattern = self.compiled[process_index][step_index].as_ref();
                chunks = self.apply_step(&chunks, step, pattern, document);
                debug!(
                    process = process.name.as_str(),
                    step = step_index,
                    chunks = chunks.len(),
                    "Applied splitting step"
                );
            }
            all_chunks.extend(chunks);
        }

        for (ordinal, chunk) in all_chunks.iter_mut().enumerate() {
            chunk.assign_stable_id(ordinal);
        }
        all_chunks
    }

    /// Split a batch; output order follows input order, then chunk order.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<DocumentChunk> {
        documents
            .iter()
            .flat_map(|document| self.split_document(document))
            .collect()
    }

    fn apply_step(
        &self,
        chunks: &[DocumentChunk],
        step: &StepConfig,
        pattern: Option<&Regex>,
        document: &Document,
    ) -> Vec<DocumentChunk> {
        let mut produced = Vec::new();
        for chunk in chunks {
            let splits = match step.strategy {
                SplitStrategy::Character => steps::split_by_character(
                    &chunk.text,
                    step.chunk_size,
                    step.chunk_overlap.unwrap_or(0),
                ),
                SplitStrategy::Word => steps::split_by_word(
                    &chunk.text,
                    step.chunk_size,
                    step.chunk_overlap.unwrap_or(0),
                ),
                SplitStrategy::Sentence => steps::split_by_sentence(
                    &chunk.text,
                    step.chunk_size,
                    step.chunk_overlap.unwrap_or(0),
                ),
                SplitStrategy::Paragraph => steps::split_by_paragraph(&chunk.text),
                SplitStrategy::Separator => {
                    steps::split_by_separator(&chunk.text, &step.separator)
                }
                SplitStrategy::Regex => match pattern {
                    Some(pattern) => {
                        steps::split_by_regex(&chunk.text, pattern, step.keep_separator)
                    }
                    None => vec![chunk.text.clone()],
                },
            };

            for split in steps::post_process(splits, step) {
                let mut produced_chunk = DocumentChunk::new(split, document.clone());
                produced_chunk.type_chunk = step
                    .type_chunk
                    .clone()
                    .or_else(|| chunk.type_chunk.clone());
                produced.push(produced_chunk);
            }
        }
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::ProcessConfig;

    fn document(text: &str) -> Document {
        Document::new("doc.txt", "data/doc.txt", text)
    }

    fn character_step(size: usize, overlap: usize, keep_empty: bool, trim: bool) -> StepConfig {
        StepConfig {
            strategy: SplitStrategy::Character,
            chunk_size: Some(size),
            chunk_overlap: Some(overlap),
            keep_empty,
            trim_whitespace: trim,
            ..StepConfig::default()
        }
    }

    fn single_process(steps: Vec<StepConfig>) -> ParserConfig {
        ParserConfig {
            processes: vec![ProcessConfig {
                name: "p".to_string(),
                steps,
            }],
        }
    }

    #[test]
    fn character_identity_reconstructs_the_document() {
        // Zero overlap, empties kept, no trimming: concatenation equals input.
        let text = "The quick brown fox\n\njumps over the lazy dog. 0123456789";
        let splitter =
            TextSplitter::new(single_process(vec![character_step(7, 0, true, false)])).unwrap();

        let chunks = splitter.split_document(&document(text));
        let rebuilt: String = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn splitting_is_deterministic_including_ids() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta";
        let splitter =
            TextSplitter::new(single_process(vec![character_step(10, 2, false, true)])).unwrap();

        let doc = document(text);
        let first = splitter.split_document(&doc);
        let second = splitter.split_document(&doc);

        let first_texts: Vec<_> = first.iter().map(|c| c.text.as_str()).collect();
        let second_texts: Vec<_> = second.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(first_texts, second_texts);

        let first_ids: Vec<_> = first.iter().map(|c| c.id.as_str()).collect();
        let second_ids: Vec<_> = second.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);

        // Ids are unique within a run.
        let mut deduped = first_ids.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), first_ids.len());
    }

    #[test]
    fn steps_chain_within_a_process() {
        let text = "first paragraph with several words\n\nsecond paragraph here";
        let steps = vec![
            StepConfig {
                strategy: SplitStrategy::Paragraph,
                ..StepConfig::default()
            },
            StepConfig {
                strategy: SplitStrategy::Word,
                chunk_size: Some(2),
                chunk_overlap: Some(0),
                ..StepConfig::default()
            },
        ];
        let splitter = TextSplitter::new(single_process(steps)).unwrap();
        let chunks = splitter.split_document(&document(text));

        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "first paragraph",
                "with several",
                "words",
                "second paragraph",
                "here"
            ]
        );
    }

    #[test]
    fn process_outputs_concatenate_in_declaration_order() {
        let text = "aaa.bbb";
        let config = ParserConfig {
            processes: vec![
                ProcessConfig {
                    name: "first".to_string(),
                    steps: vec![StepConfig {
                        strategy: SplitStrategy::Separator,
                        separator: ".".to_string(),
                        type_chunk: Some("sep".to_string()),
                        ..StepConfig::default()
                    }],
                },
                ProcessConfig {
                    name: "second".to_string(),
                    steps: vec![StepConfig {
                        strategy: SplitStrategy::Character,
                        chunk_size: Some(4),
                        chunk_overlap: Some(0),
                        ..StepConfig::default()
                    }],
                },
            ],
        };
        let splitter = TextSplitter::new(config).unwrap();
        let chunks = splitter.split_document(&document(text));

        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["aaa", "bbb", "aaa.", "bbb"]);
        assert_eq!(chunks[0].type_chunk.as_deref(), Some("sep"));
        assert_eq!(chunks[2].type_chunk, None);
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let splitter =
            TextSplitter::new(single_process(vec![character_step(10, 0, false, true)])).unwrap();
        assert!(splitter.split_document(&document("")).is_empty());
    }

    #[test]
    fn invalid_regex_fails_at_construction() {
        let config = single_process(vec![StepConfig {
            strategy: SplitStrategy::Regex,
            regex_pattern: Some("[broken".to_string()),
            ..StepConfig::default()
        }]);
        assert!(matches!(
            TextSplitter::new(config),
            Err(PipelineError::RegexInvalid(_))
        ));
    }

    #[test]
    fn regex_case_insensitive_splitting() {
        let config = single_process(vec![StepConfig {
            strategy: SplitStrategy::Regex,
            regex_pattern: Some("ITEM".to_string()),
            ignore_case: true,
            ..StepConfig::default()
        }]);
        let splitter = TextSplitter::new(config).unwrap();
        let chunks = splitter.split_document(&document("intro item one Item two"));
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["intro", "one", "two"]);
    }

    #[test]
    fn chunks_reference_their_document() {
        let splitter =
            TextSplitter::new(single_process(vec![character_step(5, 0, false, true)])).unwrap();
        let doc = document("0123456789");
        let chunks = splitter.split_document(&doc);
        assert!(chunks.iter().all(|chunk| chunk.document.id == doc.id));
    }
}
