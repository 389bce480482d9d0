//! File-backed stages for end-to-end flows: tail a file, split it into
//! lines, rewrite each line, write the results to a directory.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::core::{attributes, FlowRecord, Outcome, StageKind};
use crate::errors::StageError;
use crate::stages::{PropertyDescriptor, PropertyValidator, Stage, StageContext, Transfer};

/// Property names used by the fixture stages.
pub mod properties {
    /// File read by [`super::TailFileStage`].
    pub const FILE_TO_TAIL: &str = "File to Tail";
    /// Lines per split for [`super::SplitTextStage`].
    pub const LINE_SPLIT_COUNT: &str = "Line Split Count";
    /// Pattern for [`super::ReplaceTextStage`].
    pub const SEARCH_VALUE: &str = "Search Value";
    /// Replacement for [`super::ReplaceTextStage`]; `$1` refers to capture groups.
    pub const REPLACEMENT_VALUE: &str = "Replacement Value";
    /// Output directory of [`super::PutFileStage`].
    pub const DIRECTORY: &str = "Directory";
    /// What [`super::PutFileStage`] does when the target exists.
    pub const CONFLICT_RESOLUTION: &str = "Conflict Resolution Strategy";
}

/// Reads a whole file once and emits it as a single record.
#[derive(Debug, Default)]
pub struct TailFileStage {
    done: bool,
}

impl TailFileStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Stage for TailFileStage {
    fn name(&self) -> &str {
        "tail-file"
    }

    fn kind(&self) -> StageKind {
        StageKind::Source
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::success()]
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        vec![PropertyDescriptor::new(properties::FILE_TO_TAIL)
            .with_description("Path of the file to read")
            .required()
            .supports_variables()
            .with_validator(PropertyValidator::NonEmpty)]
    }

    fn has_more_input(&self) -> bool {
        !self.done
    }

    async fn transform(
        &mut self,
        ctx: &StageContext<'_>,
        _batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        let path = PathBuf::from(ctx.properties().require(properties::FILE_TO_TAIL)?);
        let content = tokio::fs::read(&path).await?;
        self.done = true;

        if content.is_empty() {
            return Ok(Vec::new());
        }

        let mut record = FlowRecord::new(content);
        if let Some(file_name) = path.file_name() {
            record.put_attribute(attributes::FILENAME, file_name.to_string_lossy());
        }
        if let Some(parent) = path.parent() {
            record.put_attribute(attributes::PATH, parent.to_string_lossy());
        }
        Ok(vec![Transfer::success(record)])
    }
}

/// Splits text content into groups of lines.
///
/// Each group goes to `splits` with fragment attributes; the input goes to
/// `original`. Content that is not UTF-8 goes to `failure`.
#[derive(Debug, Default)]
pub struct SplitTextStage;

impl SplitTextStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for SplitTextStage {
    fn name(&self) -> &str {
        "split-text"
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::new("splits"), Outcome::new("original"), Outcome::failure()]
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        vec![PropertyDescriptor::new(properties::LINE_SPLIT_COUNT)
            .with_default("1")
            .with_validator(PropertyValidator::PositiveInteger)]
    }

    fn preferred_batch_size(&self) -> usize {
        10
    }

    async fn transform(
        &mut self,
        ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        let per_split: usize = ctx
            .properties()
            .get_parsed(properties::LINE_SPLIT_COUNT)?
            .unwrap_or(1)
            .max(1);

        let mut out = Vec::new();
        for record in batch {
            let text = match String::from_utf8(record.content().to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    out.push(Transfer::failure(record));
                    continue;
                }
            };

            let lines: Vec<&str> = text.lines().collect();
            let chunks: Vec<String> = lines.chunks(per_split).map(|c| c.join("\n")).collect();
            let count = chunks.len().to_string();
            let identifier = record.id().to_string();

            for (index, chunk) in chunks.into_iter().enumerate() {
                let mut split = record.fork(chunk);
                split.put_attribute(attributes::FRAGMENT_IDENTIFIER, identifier.as_str());
                split.put_attribute(attributes::FRAGMENT_INDEX, (index + 1).to_string());
                split.put_attribute(attributes::FRAGMENT_COUNT, count.as_str());
                out.push(Transfer::new(split, "splits"));
            }
            out.push(Transfer::new(record, "original"));
        }
        Ok(out)
    }
}

/// Rewrites text content with a regular expression.
#[derive(Debug, Default)]
pub struct ReplaceTextStage {
    pattern: Option<Regex>,
}

impl ReplaceTextStage {
    /// Pattern matching the whole content as group 1.
    pub const WHOLE_CONTENT: &'static str = "(?s)(^.*$)";

    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Stage for ReplaceTextStage {
    fn name(&self) -> &str {
        "replace-text"
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::success(), Outcome::failure()]
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new(properties::SEARCH_VALUE)
                .with_default(Self::WHOLE_CONTENT)
                .with_validator(PropertyValidator::Regex),
            PropertyDescriptor::new(properties::REPLACEMENT_VALUE)
                .with_default("$1")
                .supports_variables(),
        ]
    }

    async fn on_scheduled(&mut self, ctx: &StageContext<'_>) -> Result<(), StageError> {
        let search = ctx.properties().require(properties::SEARCH_VALUE)?;
        self.pattern = Some(Regex::new(search).map_err(|e| StageError::message(e.to_string()))?);
        Ok(())
    }

    async fn transform(
        &mut self,
        ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        let pattern = self
            .pattern
            .as_ref()
            .ok_or_else(|| StageError::message("search pattern not compiled"))?;
        let replacement = ctx.properties().require(properties::REPLACEMENT_VALUE)?;

        Ok(batch
            .into_iter()
            .map(|mut record| {
                let replaced = std::str::from_utf8(record.content())
                    .map(|text| pattern.replace_all(text, replacement).into_owned());
                match replaced {
                    Ok(content) => {
                        record.replace_content(content);
                        Transfer::success(record)
                    }
                    Err(_) => Transfer::failure(record),
                }
            })
            .collect())
    }
}

/// Writes each record to a file in a directory.
///
/// A written record goes to the reserved `written` outcome; a copy goes to
/// `success` for downstream processing. Records that could not be written go
/// to `failure`.
#[derive(Debug, Default)]
pub struct PutFileStage;

impl PutFileStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn write(
        directory: &Path,
        strategy: &str,
        record: &FlowRecord,
    ) -> Result<bool, StageError> {
        let file_name = record
            .attribute(attributes::FILENAME)
            .map_or_else(|| record.id().to_string(), ToString::to_string);
        let target = directory.join(file_name);

        if tokio::fs::try_exists(&target).await? {
            match strategy {
                "ignore" => return Ok(true),
                "fail" => return Ok(false),
                _ => {}
            }
        }
        tokio::fs::write(&target, record.content()).await?;
        Ok(true)
    }
}

#[async_trait]
impl Stage for PutFileStage {
    fn name(&self) -> &str {
        "put-file"
    }

    fn kind(&self) -> StageKind {
        StageKind::Sink
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::success(), Outcome::failure(), Outcome::written()]
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new(properties::DIRECTORY)
                .required()
                .supports_variables()
                .with_validator(PropertyValidator::NonEmpty),
            PropertyDescriptor::new(properties::CONFLICT_RESOLUTION)
                .with_default("fail")
                .with_validator(PropertyValidator::AllowedValues(vec![
                    "replace".to_string(),
                    "ignore".to_string(),
                    "fail".to_string(),
                ])),
        ]
    }

    async fn on_scheduled(&mut self, ctx: &StageContext<'_>) -> Result<(), StageError> {
        let directory = ctx.properties().require(properties::DIRECTORY)?;
        tokio::fs::create_dir_all(directory).await?;
        Ok(())
    }

    async fn transform(
        &mut self,
        ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        let directory = PathBuf::from(ctx.properties().require(properties::DIRECTORY)?);
        let strategy = ctx.properties().require(properties::CONFLICT_RESOLUTION)?;

        let mut out = Vec::with_capacity(batch.len() * 2);
        for record in batch {
            if Self::write(&directory, strategy, &record).await? {
                out.push(Transfer::success(record.fork(record.content().clone())));
                out.push(Transfer::new(record, Outcome::written()));
            } else {
                out.push(Transfer::failure(record));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageId;
    use crate::stages::{PropertyValue, StageProperties};

    fn props(stage: &dyn Stage, values: &[(&str, &str)]) -> StageProperties {
        let mut props = StageProperties::new(stage.property_descriptors());
        for (name, value) in values {
            props.insert(
                *name,
                PropertyValue {
                    raw: (*value).to_string(),
                    resolved: (*value).to_string(),
                    service: None,
                },
            );
        }
        props
    }

    #[tokio::test]
    async fn test_split_text_fragments() {
        let mut stage = SplitTextStage::new();
        let props = props(&stage, &[]);
        let ctx = StageContext::new(StageId(1), "split-text", &props);

        let out = stage
            .transform(&ctx, vec![FlowRecord::from_text("one\ntwo\nthree")])
            .await
            .unwrap();

        let splits: Vec<&Transfer> = out.iter().filter(|t| t.outcome.as_str() == "splits").collect();
        assert_eq!(splits.len(), 3);
        assert_eq!(splits[1].record.content_text(), "two");
        assert_eq!(splits[1].record.attribute(attributes::FRAGMENT_INDEX), Some("2"));
        assert_eq!(splits[2].record.attribute(attributes::FRAGMENT_COUNT), Some("3"));
        assert_eq!(out.last().unwrap().outcome.as_str(), "original");
    }

    #[tokio::test]
    async fn test_replace_text_appends() {
        let mut stage = ReplaceTextStage::new();
        let props = props(&stage, &[(properties::REPLACEMENT_VALUE, "$1!!!")]);
        let ctx = StageContext::new(StageId(2), "replace-text", &props);

        stage.on_scheduled(&ctx).await.unwrap();
        let out = stage
            .transform(&ctx, vec![FlowRecord::from_text("hello world")])
            .await
            .unwrap();

        assert_eq!(out[0].record.content_text(), "hello world!!!");
    }

    #[tokio::test]
    async fn test_put_file_conflict_fail() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().to_string_lossy().to_string();
        let mut stage = PutFileStage::new();
        let props = props(&stage, &[(properties::DIRECTORY, target.as_str())]);
        let ctx = StageContext::new(StageId(3), "put-file", &props);

        let record = || FlowRecord::from_text("x").with_attribute(attributes::FILENAME, "out.txt");
        let first = stage.transform(&ctx, vec![record()]).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].outcome, Outcome::written());

        let second = stage.transform(&ctx, vec![record()]).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].outcome, Outcome::failure());
    }
}
