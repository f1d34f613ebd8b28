// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! CSV-driven conditional replacement of shape comments.
//!
//! Each [`UpdateRow`] names an image, a shape on that image, the text the
//! shape is expected to carry and the text to write instead. Rows are
//! applied in file order, one at a time. A shape is only written when its
//! current text is exactly the expected text; every other row is skipped
//! with a reason and never aborts the run.

use crate::{
    Error,
    api::{Dataset, ImageID, ShapeID, find_shape},
    service::ObjectService,
    session::Session,
};
use log::{Level, debug, error, info, log_enabled, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt::Display,
    io,
};
use tokio::sync::mpsc::Sender;

/// Column names every input file must provide. Extra columns are ignored.
pub const REQUIRED_COLUMNS: [&str; 4] = ["image_id", "shape_id", "old_text", "new_text"];

/// Progress of a run, sent after each row.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Rows processed so far.
    pub current: usize,
    /// Rows in the input.
    pub total: usize,
}

/// One conditional text replacement read from the input file.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct UpdateRow {
    /// Line of the record in the input file, the header being line 1.
    #[serde(skip)]
    pub line: u64,
    pub image_id: ImageID,
    pub shape_id: ShapeID,
    pub old_text: String,
    pub new_text: String,
}

impl UpdateRow {
    pub fn new(image_id: u64, shape_id: u64, old_text: &str, new_text: &str) -> Self {
        UpdateRow {
            line: 0,
            image_id: image_id.into(),
            shape_id: shape_id.into(),
            old_text: old_text.to_string(),
            new_text: new_text.to_string(),
        }
    }
}

/// Reads every update row from CSV input.
///
/// The header is checked first: a missing required column fails with
/// [`Error::Schema`] naming every missing column. The whole input is then
/// parsed, and a record whose identifiers are not integers fails with
/// [`Error::InvalidRow`], so a bad file is rejected before any row is
/// applied. Text fields are taken verbatim: no trimming, and an empty field
/// is the empty string.
pub fn read_rows<R: io::Read>(reader: R) -> Result<Vec<UpdateRow>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::Schema(missing));
    }

    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let mut row: UpdateRow =
            record
                .deserialize(Some(&headers))
                .map_err(|e| Error::InvalidRow {
                    line,
                    message: e.to_string(),
                })?;
        row.line = line;
        rows.push(row);
    }

    debug!("Read {} update rows", rows.len());
    Ok(rows)
}

/// Why a row was not applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    ImageNotFound,
    ShapeNotFound,
    TextMismatch,
    /// The server failed to answer a lookup for the row.
    LookupFailed(String),
}

impl SkipReason {
    /// Reason without the server message, used to group skips.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::ImageNotFound => "image not found",
            SkipReason::ShapeNotFound => "shape not found",
            SkipReason::TextMismatch => "text mismatch",
            SkipReason::LookupFailed(_) => "lookup failed",
        }
    }
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SkipReason::LookupFailed(msg) => write!(f, "lookup failed: {}", msg),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// What happened to one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowOutcome {
    /// The shape text was replaced and saved.
    Updated,
    /// The shape matched but the run is a dry run.
    WouldUpdate,
    Skipped(SkipReason),
    /// Linking or saving failed. Holds the error message.
    Failed(String),
}

impl RowOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RowOutcome::Updated => "updated",
            RowOutcome::WouldUpdate => "would_update",
            RowOutcome::Skipped(_) => "skipped",
            RowOutcome::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            RowOutcome::Updated | RowOutcome::WouldUpdate => String::new(),
            RowOutcome::Skipped(reason) => reason.to_string(),
            RowOutcome::Failed(message) => message.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RowReport {
    pub row: UpdateRow,
    pub outcome: RowOutcome,
}

#[derive(Serialize)]
struct ReportRecord<'a> {
    line: u64,
    image_id: ImageID,
    shape_id: ShapeID,
    status: &'a str,
    reason: String,
}

/// Outcome of every row of a run, in input order, and the images that
/// were linked into the target dataset.
#[derive(Clone, Debug, Default)]
pub struct UpdateReport {
    rows: Vec<RowReport>,
    linked: Vec<ImageID>,
}

impl UpdateReport {
    pub fn rows(&self) -> &[RowReport] {
        &self.rows
    }

    /// Images newly linked into the target dataset, in link order.
    pub fn linked(&self) -> &[ImageID] {
        &self.linked
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::Updated))
    }

    pub fn would_update(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::WouldUpdate))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::Failed(_)))
    }

    /// Number of skipped rows per skip reason label.
    pub fn skips_by_reason(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for report in &self.rows {
            if let RowOutcome::Skipped(reason) = &report.outcome {
                *counts.entry(reason.label()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Writes one CSV record per row with the columns
    /// `line,image_id,shape_id,status,reason`.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        writer.write_record(["line", "image_id", "shape_id", "status", "reason"])?;
        for report in &self.rows {
            writer.serialize(ReportRecord {
                line: report.row.line,
                image_id: report.row.image_id,
                shape_id: report.row.shape_id,
                status: report.outcome.status(),
                reason: report.outcome.reason(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    fn count(&self, f: impl Fn(&RowOutcome) -> bool) -> usize {
        self.rows.iter().filter(|r| f(&r.outcome)).count()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ApplyOptions {
    /// Perform every lookup and comparison but no link and no save.
    pub dry_run: bool,
}

/// Applies the rows to the shapes visible in the session's group, linking
/// each image found into `target`.
///
/// Rows are processed strictly in order. Missing images or shapes, text
/// mismatches and failed lookups are recorded as skips. A failed link or
/// save is recorded as a failure and the run continues. Only a structural
/// error, such as the session being closed or the server becoming
/// unreachable, aborts the run; rows already applied stay applied.
///
/// An image is linked at most once per run, and never when the target is
/// already one of its parent datasets.
pub async fn apply_updates<S: ObjectService>(
    session: &mut Session<S>,
    rows: &[UpdateRow],
    target: &Dataset,
    options: &ApplyOptions,
    progress: Option<Sender<Progress>>,
) -> Result<UpdateReport, Error> {
    let total = rows.len();
    let mut report = UpdateReport::default();
    let mut linked = HashSet::new();

    info!(
        "Applying {} rows into dataset {}{}",
        total,
        target,
        if options.dry_run { " (dry run)" } else { "" }
    );

    if let Some(progress) = &progress {
        let _ = progress.send(Progress { current: 0, total }).await;
    }

    for (index, row) in rows.iter().enumerate() {
        let outcome = apply_row(session, row, target, options, &mut linked, &mut report).await?;

        match &outcome {
            RowOutcome::Updated => info!(
                "Line {}: shape {} of image {} updated",
                row.line, row.shape_id, row.image_id
            ),
            RowOutcome::WouldUpdate => info!(
                "Line {}: shape {} of image {} would be updated",
                row.line, row.shape_id, row.image_id
            ),
            RowOutcome::Skipped(reason) => warn!(
                "Line {}: skipping shape {} of image {}: {}",
                row.line, row.shape_id, row.image_id, reason
            ),
            RowOutcome::Failed(message) => error!(
                "Line {}: shape {} of image {}: {}",
                row.line, row.shape_id, row.image_id, message
            ),
        }

        report.rows.push(RowReport {
            row: row.clone(),
            outcome,
        });

        if let Some(progress) = &progress {
            let _ = progress
                .send(Progress {
                    current: index + 1,
                    total,
                })
                .await;
        }
    }

    Ok(report)
}

/// Maps a lookup error to a skip unless it is structural.
fn lookup_skip(err: Error) -> Result<RowOutcome, Error> {
    if err.is_structural() {
        Err(err)
    } else {
        Ok(RowOutcome::Skipped(SkipReason::LookupFailed(err.to_string())))
    }
}

/// Maps a write error to a row failure unless it is structural.
fn write_failure(err: Error, what: String) -> Result<RowOutcome, Error> {
    if err.is_structural() {
        Err(err)
    } else {
        Ok(RowOutcome::Failed(
            Error::Persistence(format!("{}: {}", what, err)).to_string(),
        ))
    }
}

async fn apply_row<S: ObjectService>(
    session: &mut Session<S>,
    row: &UpdateRow,
    target: &Dataset,
    options: &ApplyOptions,
    linked: &mut HashSet<ImageID>,
    report: &mut UpdateReport,
) -> Result<RowOutcome, Error> {
    let image = match session.image(row.image_id).await {
        Ok(Some(image)) => image,
        Ok(None) => return Ok(RowOutcome::Skipped(SkipReason::ImageNotFound)),
        Err(err) => return lookup_skip(err),
    };

    if !image.in_dataset(target.id()) && !linked.contains(&image.id()) {
        if options.dry_run {
            debug!("Image {} would be linked into dataset {}", image.id(), target.id());
        } else {
            if let Err(err) = session.link_image(target.id(), image.id()).await {
                return write_failure(
                    err,
                    format!("linking image {} into dataset {}", image.id(), target.id()),
                );
            }
            debug!("Linked image {} into dataset {}", image.id(), target.id());
            linked.insert(image.id());
            report.linked.push(image.id());
        }
    }

    let rois = match session.rois(image.id()).await {
        Ok(rois) => rois,
        Err(err) => return lookup_skip(err),
    };

    let Some(shape) = find_shape(&rois, row.shape_id) else {
        return Ok(RowOutcome::Skipped(SkipReason::ShapeNotFound));
    };

    if shape.text() != row.old_text {
        if log_enabled!(Level::Debug) {
            debug!(
                "Shape {} text {:?} does not match expected {:?}",
                shape.id(),
                shape.text(),
                row.old_text
            );
        }
        return Ok(RowOutcome::Skipped(SkipReason::TextMismatch));
    }

    if options.dry_run {
        return Ok(RowOutcome::WouldUpdate);
    }

    let mut shape = shape.clone();
    shape.set_text(&row.new_text);
    match session.save_shape(image.id(), &shape).await {
        Ok(_) => Ok(RowOutcome::Updated),
        Err(err) => write_failure(err, format!("saving shape {}", shape.id())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        MemoryService,
        api::{DatasetID, GroupID, Roi, RoiID, Shape},
    };

    const CSV: &str = "image_id,shape_id,old_text,new_text\n10,5,foo,bar\n";

    struct Fixture {
        session: Session<MemoryService>,
        target: Dataset,
        other: DatasetID,
    }

    async fn fixture() -> Result<Fixture, Error> {
        let mut service = MemoryService::new();
        let lab = service.add_group(GroupID::from(3), "lab");
        let elsewhere = service.add_group(GroupID::from(4), "elsewhere");
        let target = service.add_dataset(lab, "target");
        let other = service.add_dataset(lab, "other");

        service.add_image(lab, ImageID::from(10), "a.tif", None);
        service.add_roi(
            ImageID::from(10),
            Roi::new(
                RoiID::from(1),
                vec![
                    Shape::new(ShapeID::from(4), Some("untouched")),
                    Shape::new(ShapeID::from(5), Some("foo")),
                ],
            ),
        );
        service.add_roi(
            ImageID::from(10),
            Roi::new(RoiID::from(2), vec![Shape::new(ShapeID::from(6), None)]),
        );

        service.add_image(lab, ImageID::from(11), "b.tif", Some(other));
        service.add_roi(
            ImageID::from(11),
            Roi::new(
                RoiID::from(3),
                vec![Shape::new(ShapeID::from(5), Some(" padded "))],
            ),
        );

        service.add_image(lab, ImageID::from(12), "c.tif", Some(target));
        service.add_roi(
            ImageID::from(12),
            Roi::new(RoiID::from(4), vec![Shape::new(ShapeID::from(7), Some("x"))]),
        );

        service.add_image(elsewhere, ImageID::from(30), "hidden.tif", None);

        let mut session = Session::new(service);
        session.select_group(lab).await?;
        let target = session
            .dataset(target)
            .await?
            .ok_or(Error::InvalidResponse)?;
        Ok(Fixture {
            session,
            target,
            other,
        })
    }

    fn text(fixture: &Fixture, image: u64, shape: u64) -> String {
        fixture
            .session
            .service()
            .shape(ImageID::from(image), ShapeID::from(shape))
            .map(|s| s.text().to_string())
            .unwrap_or_default()
    }

    async fn run(fixture: &mut Fixture, rows: &[UpdateRow]) -> Result<UpdateReport, Error> {
        apply_updates(
            &mut fixture.session,
            rows,
            &fixture.target,
            &ApplyOptions::default(),
            None,
        )
        .await
    }

    #[test]
    fn test_read_rows() {
        let input = "image_id,shape_id,old_text,new_text,note\n\
                     10,5,foo,bar,first\n\
                     11,5, padded ,,second\n";
        let rows = read_rows(input.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].image_id, ImageID::from(10));
        assert_eq!(rows[0].new_text, "bar");
        assert_eq!(rows[1].line, 3);
        assert_eq!(rows[1].image_id, ImageID::from(11));
        assert_eq!(rows[1].old_text, " padded ");
        assert_eq!(rows[1].new_text, "");
    }

    #[test]
    fn test_read_rows_columns_in_any_order() {
        let input = "new_text,old_text,shape_id,image_id\nbar,foo,5,10\n";
        let rows = read_rows(input.as_bytes()).unwrap();
        let mut expected = UpdateRow::new(10, 5, "foo", "bar");
        expected.line = 2;
        assert_eq!(rows, vec![expected]);
    }

    #[test]
    fn test_read_rows_missing_columns() {
        let input = "image_id,old_text,comment\n10,foo,bar\n";
        match read_rows(input.as_bytes()) {
            Err(Error::Schema(missing)) => {
                assert_eq!(missing, vec!["shape_id".to_string(), "new_text".to_string()])
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_read_rows_invalid_identifier() {
        let input = "image_id,shape_id,old_text,new_text\n10,5,a,b\nten,5,a,b\n";
        match read_rows(input.as_bytes()) {
            Err(Error::InvalidRow { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected invalid row, got {:?}", other),
        }
    }

    #[test]
    fn test_read_rows_header_only() {
        let rows = read_rows("image_id,shape_id,old_text,new_text\n".as_bytes()).unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_matching_row_updates_and_links() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = read_rows(CSV.as_bytes())?;

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(report.rows()[0].outcome, RowOutcome::Updated);
        assert_eq!(report.updated(), 1);
        assert_eq!(text(&fixture, 10, 5), "bar");
        assert_eq!(text(&fixture, 10, 4), "untouched");
        assert_eq!(
            fixture.session.service().image_parents(ImageID::from(10)),
            &[fixture.target.id()]
        );
        assert_eq!(report.linked(), &[ImageID::from(10)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_text_mismatch_leaves_shape() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![UpdateRow::new(10, 5, "baz", "bar")];

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(
            report.rows()[0].outcome,
            RowOutcome::Skipped(SkipReason::TextMismatch)
        );
        assert_eq!(report.rows()[0].outcome.reason(), "text mismatch");
        assert_eq!(text(&fixture, 10, 5), "foo");
        assert!(fixture.session.service().saves().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_comparison_is_exact() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![
            UpdateRow::new(11, 5, "padded", "trimmed"),
            UpdateRow::new(10, 5, "FOO", "bar"),
        ];

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(report.skipped(), 2);
        assert_eq!(text(&fixture, 11, 5), " padded ");

        let rows = vec![UpdateRow::new(11, 5, " padded ", "  kept  ")];
        let report = run(&mut fixture, &rows).await?;
        assert_eq!(report.updated(), 1);
        assert_eq!(text(&fixture, 11, 5), "  kept  ");
        Ok(())
    }

    #[tokio::test]
    async fn test_shape_without_text_matches_empty() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![UpdateRow::new(10, 6, "", "labelled")];

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(report.updated(), 1);
        assert_eq!(text(&fixture, 10, 6), "labelled");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_image_skips_without_side_effects() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![
            UpdateRow::new(99, 5, "foo", "bar"),
            UpdateRow::new(30, 1, "foo", "bar"),
        ];

        let report = run(&mut fixture, &rows).await?;
        for row in report.rows() {
            assert_eq!(row.outcome, RowOutcome::Skipped(SkipReason::ImageNotFound));
        }
        assert!(fixture.session.service().links().is_empty());
        assert!(fixture.session.service().saves().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_shape_skips() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![UpdateRow::new(10, 77, "foo", "bar")];

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(
            report.rows()[0].outcome.reason(),
            SkipReason::ShapeNotFound.to_string()
        );
        assert!(fixture.session.service().saves().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_image_in_other_dataset_is_relinked() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        assert_eq!(
            fixture.session.service().image_parents(ImageID::from(11)),
            &[fixture.other]
        );
        let rows = vec![UpdateRow::new(11, 5, " padded ", "done")];

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(report.linked(), &[ImageID::from(11)]);
        assert_eq!(
            fixture.session.service().image_parents(ImageID::from(11)),
            &[fixture.other, fixture.target.id()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_image_in_several_datasets_including_target_is_not_linked()
    -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let target = fixture.target.id();
        fixture
            .session
            .service_mut()
            .add_parent(ImageID::from(11), target);
        assert_eq!(
            fixture.session.service().image_parents(ImageID::from(11)),
            &[fixture.other, target]
        );

        let rows = vec![UpdateRow::new(11, 5, " padded ", "done")];
        let report = run(&mut fixture, &rows).await?;
        assert_eq!(report.updated(), 1);
        assert!(report.linked().is_empty());
        assert!(fixture.session.service().links().is_empty());
        assert_eq!(text(&fixture, 11, 5), "done");
        Ok(())
    }

    #[tokio::test]
    async fn test_image_already_in_target_is_not_linked() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![UpdateRow::new(12, 7, "x", "y")];

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(report.updated(), 1);
        assert!(report.linked().is_empty());
        assert!(fixture.session.service().links().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_linking_is_idempotent_across_rows_and_runs() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![
            UpdateRow::new(10, 5, "foo", "bar"),
            UpdateRow::new(10, 4, "untouched", "touched"),
        ];

        run(&mut fixture, &rows).await?;
        assert_eq!(fixture.session.service().links().len(), 1);

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(fixture.session.service().links().len(), 1);
        assert!(report.linked().is_empty());
        // Second run no longer matches since the text was replaced.
        assert_eq!(report.skipped(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_failure_is_reported_and_run_continues() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        fixture
            .session
            .service_mut()
            .fail_saves_for(ShapeID::from(5));
        let rows = vec![
            UpdateRow::new(10, 5, "foo", "bar"),
            UpdateRow::new(12, 7, "x", "y"),
        ];

        let report = run(&mut fixture, &rows).await?;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.rows()[0].outcome.status(), "failed");
        assert!(report.rows()[0].outcome.reason().starts_with("Failed to save"));
        assert_eq!(report.rows()[1].outcome, RowOutcome::Updated);
        assert_eq!(text(&fixture, 10, 5), "foo");
        assert_eq!(text(&fixture, 12, 7), "y");
        Ok(())
    }

    #[tokio::test]
    async fn test_lookup_failure_skips_row() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        fixture
            .session
            .service_mut()
            .fail_lookups_for(ImageID::from(10));
        let rows = vec![
            UpdateRow::new(10, 5, "foo", "bar"),
            UpdateRow::new(12, 7, "x", "y"),
        ];

        let report = run(&mut fixture, &rows).await?;
        assert!(matches!(
            &report.rows()[0].outcome,
            RowOutcome::Skipped(SkipReason::LookupFailed(_))
        ));
        assert!(report.rows()[0].outcome.reason().starts_with("lookup failed: "));
        assert_eq!(report.updated(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_session_aborts() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        fixture.session.close().await?;
        let rows = vec![UpdateRow::new(10, 5, "foo", "bar")];

        let result = run(&mut fixture, &rows).await;
        assert!(matches!(result, Err(Error::SessionClosed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![
            UpdateRow::new(10, 5, "foo", "bar"),
            UpdateRow::new(10, 4, "nope", "bar"),
        ];

        let report = apply_updates(
            &mut fixture.session,
            &rows,
            &fixture.target,
            &ApplyOptions { dry_run: true },
            None,
        )
        .await?;
        assert_eq!(report.would_update(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(text(&fixture, 10, 5), "foo");
        assert!(fixture.session.service().links().is_empty());
        assert!(fixture.session.service().saves().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_is_reported() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = vec![
            UpdateRow::new(10, 5, "foo", "bar"),
            UpdateRow::new(99, 1, "a", "b"),
        ];
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);

        apply_updates(
            &mut fixture.session,
            &rows,
            &fixture.target,
            &ApplyOptions::default(),
            Some(tx),
        )
        .await?;

        let mut seen = Vec::new();
        while let Some(Progress { current, total }) = rx.recv().await {
            assert_eq!(total, 2);
            seen.push(current);
        }
        assert_eq!(seen, vec![0, 1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_report_csv() -> Result<(), Error> {
        let mut fixture = fixture().await?;
        let rows = read_rows(
            "image_id,shape_id,old_text,new_text\n10,5,foo,bar\n99,1,a,b\n10,4,zzz,b\n".as_bytes(),
        )?;

        let report = run(&mut fixture, &rows).await?;
        let mut out = Vec::new();
        report.write_csv(&mut out)?;
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            "line,image_id,shape_id,status,reason\n\
             2,10,5,updated,\n\
             3,99,1,skipped,image not found\n\
             4,10,4,skipped,text mismatch\n"
        );

        let skips = report.skips_by_reason();
        assert_eq!(skips.get("image not found"), Some(&1));
        assert_eq!(skips.get("text mismatch"), Some(&1));
        Ok(())
    }
}
