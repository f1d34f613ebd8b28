// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Error,
    api::{Dataset, DatasetID},
    service::ObjectService,
    session::Session,
};
use log::info;

/// Dataset selection value meaning "create a new dataset".
pub const CREATE_NEW: DatasetID = DatasetID::new(0);

/// How the target dataset of a run is chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetChoice {
    /// Create a dataset with this name.
    Create(String),
    /// Use an existing dataset of the active group.
    Existing(DatasetID),
}

impl TargetChoice {
    /// Interprets a dataset selection, where [`CREATE_NEW`] selects the
    /// create path with the given name.
    pub fn from_selection(selection: DatasetID, name: Option<&str>) -> Self {
        if selection == CREATE_NEW {
            TargetChoice::Create(name.unwrap_or_default().to_string())
        } else {
            TargetChoice::Existing(selection)
        }
    }
}

/// Resolves the run's target dataset among the datasets of the active
/// group.
///
/// When the group has no datasets only [`TargetChoice::Create`] is
/// accepted. Creating requires a non-blank name ([`Error::Validation`]) and
/// an existing identifier must be one of `datasets`
/// ([`Error::InvalidSelection`]).
pub async fn resolve_target<S: ObjectService>(
    session: &mut Session<S>,
    datasets: &[Dataset],
    choice: &TargetChoice,
) -> Result<Dataset, Error> {
    match choice {
        TargetChoice::Create(name) => {
            require_name(name)?;
            let dataset = session.create_dataset(name).await?;
            info!("Created dataset {}", dataset);
            Ok(dataset)
        }
        TargetChoice::Existing(id) => existing(datasets, *id),
    }
}

/// Resolves the target like [`resolve_target`] without writing anything,
/// for dry runs.
///
/// A dataset that would be created is returned as a placeholder with the
/// [`CREATE_NEW`] identifier. Validation is the same as for a real run.
pub fn preview_target(datasets: &[Dataset], choice: &TargetChoice) -> Result<Dataset, Error> {
    match choice {
        TargetChoice::Create(name) => {
            require_name(name)?;
            info!("Dataset {} would be created", name);
            Ok(Dataset::new(CREATE_NEW, name))
        }
        TargetChoice::Existing(id) => existing(datasets, *id),
    }
}

fn require_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::Validation(
            "a name is required to create a dataset".to_string(),
        ));
    }
    Ok(())
}

fn existing(datasets: &[Dataset], id: DatasetID) -> Result<Dataset, Error> {
    if datasets.is_empty() {
        return Err(Error::InvalidSelection(format!(
            "dataset {} cannot be used, the group has no datasets (use {} to create one)",
            id, CREATE_NEW
        )));
    }
    let dataset = datasets
        .iter()
        .find(|d| d.id() == id)
        .cloned()
        .ok_or_else(|| Error::InvalidSelection(format!("dataset {} is not in the group", id)))?;
    info!("Using dataset {}", dataset);
    Ok(dataset)
}
