// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! # OMERO Shape Comment Replacement
//!
//! Bulk, conditional replacement of shape comments on an OMERO server,
//! driven by a CSV file. Each row names an image, one of its shapes, the
//! comment the shape is expected to carry and the replacement. A shape is
//! only changed when its current comment matches exactly, and every image
//! touched by the run is linked into one target dataset.
//!
//! A run has three stages:
//!
//! - **Session**: log in and select the group every query is scoped to
//!   ([`Session`])
//! - **Target**: select an existing dataset of the group or create one
//!   ([`resolve_target`], or [`preview_target`] for a dry run)
//! - **Updates**: apply the CSV rows in order ([`apply_updates`])
//!
//! The server is reached through the [`ObjectService`] trait. [`Client`]
//! implements it over the OMERO.web JSON API and [`MemoryService`] in
//! process.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use omero_replace::{
//!     ApplyOptions, ConnectOptions, Error, GroupID, Session, TargetChoice, apply_updates,
//!     read_rows, resolve_target,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let rows = read_rows(std::fs::File::open("comments.csv")?)?;
//!
//!     let options = ConnectOptions::new("omero.example.org", "alice", "secret");
//!     let mut session = Session::connect(&options).await?;
//!     let report = session
//!         .scoped(async |session| {
//!             session.select_group(GroupID::from(53)).await?;
//!             let datasets = session.datasets().await?;
//!             let choice = TargetChoice::Create("reviewed".to_string());
//!             let target = resolve_target(session, &datasets, &choice).await?;
//!             apply_updates(session, &rows, &target, &ApplyOptions::default(), None).await
//!         })
//!         .await?;
//!
//!     println!("{} shapes updated", report.updated());
//!     Ok(())
//! }
//! ```

mod api;
mod client;
mod config;
mod error;
mod service;
mod session;
mod target;
mod update;

pub use crate::{
    api::{
        Dataset, DatasetID, Group, GroupID, Image, ImageID, Roi, RoiID, Shape, ShapeID,
        find_shape,
    },
    client::Client,
    config::Settings,
    error::Error,
    service::{MemoryService, ObjectService},
    session::{ConnectOptions, Session},
    target::{CREATE_NEW, TargetChoice, preview_target, resolve_target},
    update::{
        ApplyOptions, Progress, REQUIRED_COLUMNS, RowOutcome, RowReport, SkipReason,
        UpdateReport, UpdateRow, apply_updates, read_rows,
    },
};
