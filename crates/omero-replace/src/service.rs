// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Object service abstraction over the OMERO server.
//!
//! The session, target resolver and update applier only talk to the server
//! through the [`ObjectService`] trait, which exposes the handful of
//! get-by-id, list, create, link and save operations they need.
//!
//! # Implementations
//!
//! - [`Client`][crate::Client]: the OMERO.web JSON API over HTTPS
//! - [`MemoryService`]: an in-process object store (no network)
//!
//! # Examples
//!
//! ```rust
//! use omero_replace::{GroupID, ImageID, MemoryService, Roi, RoiID, Shape, ShapeID};
//!
//! let mut service = MemoryService::new();
//! let group = service.add_group(GroupID::from(3), "lab");
//! service.add_image(group, ImageID::from(10), "cells.tif", None);
//! service.add_roi(
//!     ImageID::from(10),
//!     Roi::new(RoiID::from(1), vec![Shape::new(ShapeID::from(5), Some("foo"))]),
//! );
//! assert_eq!(
//!     service.shape(ImageID::from(10), ShapeID::from(5)).unwrap().text(),
//!     "foo"
//! );
//! ```

use crate::{
    Error,
    api::{Dataset, DatasetID, Group, GroupID, Image, ImageID, Roi, Shape, ShapeID},
};
use log::debug;
use std::collections::{BTreeMap, HashSet};

/// Operations the pipeline needs from the server.
///
/// Queries are scoped to the group last passed to
/// [`set_group`][Self::set_group]. Lookups by identifier return `Ok(None)`
/// when the object does not exist or is not visible in the active group.
#[allow(async_fn_in_trait)]
pub trait ObjectService {
    /// Lists the groups the authenticated user is a member of.
    async fn groups(&self) -> Result<Vec<Group>, Error>;

    /// Scopes subsequent queries to the group.
    async fn set_group(&mut self, group_id: GroupID) -> Result<(), Error>;

    /// Lists the datasets of the active group.
    async fn datasets(&self) -> Result<Vec<Dataset>, Error>;

    async fn dataset(&self, dataset_id: DatasetID) -> Result<Option<Dataset>, Error>;

    /// Creates a dataset in the active group.
    async fn create_dataset(&mut self, name: &str) -> Result<Dataset, Error>;

    /// Fetches an image with its current parent dataset.
    async fn image(&self, image_id: ImageID) -> Result<Option<Image>, Error>;

    /// Lists the ROIs of an image, each with its shapes.
    async fn rois(&self, image_id: ImageID) -> Result<Vec<Roi>, Error>;

    /// Links the image into the dataset.
    async fn link_image(&mut self, dataset_id: DatasetID, image_id: ImageID)
    -> Result<(), Error>;

    /// Persists the shape, which belongs to the given image.
    async fn save_shape(&mut self, image_id: ImageID, shape: &Shape) -> Result<Shape, Error>;

    /// Ends the server session. Further calls fail with
    /// [`Error::SessionClosed`].
    async fn close(&mut self) -> Result<(), Error>;
}

#[derive(Debug)]
struct StoredImage {
    group: GroupID,
    image: Image,
    rois: Vec<Roi>,
}

/// In-memory object service (no network).
///
/// Holds groups, datasets, images and their ROIs in process and follows the
/// server's behavior closely enough to exercise the full pipeline: group
/// scoping, images in several datasets, dataset creation, linking and shape saves.
/// Every link and save call is recorded for inspection, and failures can be
/// injected per shape or per image.
#[derive(Debug, Default)]
pub struct MemoryService {
    groups: Vec<Group>,
    group: Option<GroupID>,
    datasets: BTreeMap<DatasetID, (GroupID, Dataset)>,
    images: BTreeMap<ImageID, StoredImage>,
    next_id: u64,
    links: Vec<(DatasetID, ImageID)>,
    saves: Vec<(ImageID, ShapeID)>,
    failing_saves: HashSet<ShapeID>,
    failing_lookups: HashSet<ImageID>,
    closed: u32,
}

impl MemoryService {
    pub fn new() -> Self {
        MemoryService {
            next_id: 1000,
            ..Default::default()
        }
    }

    pub fn add_group(&mut self, id: GroupID, name: &str) -> GroupID {
        self.groups.push(Group::new(id, name));
        id
    }

    pub fn add_dataset(&mut self, group: GroupID, name: &str) -> DatasetID {
        let id = self.allocate_id().into();
        self.datasets.insert(id, (group, Dataset::new(id, name)));
        id
    }

    pub fn add_image(
        &mut self,
        group: GroupID,
        id: ImageID,
        name: &str,
        parent: Option<DatasetID>,
    ) -> ImageID {
        self.images.insert(
            id,
            StoredImage {
                group,
                image: Image::new(id, name, parent.into_iter().collect()),
                rois: Vec::new(),
            },
        );
        id
    }

    /// Seeds an extra parent dataset without recording a link operation.
    pub fn add_parent(&mut self, image: ImageID, dataset: DatasetID) {
        if let Some(stored) = self.images.get_mut(&image) {
            stored.image.add_parent(dataset);
        }
    }

    /// Attaches a ROI to an image. Does nothing if the image is unknown.
    pub fn add_roi(&mut self, image: ImageID, roi: Roi) {
        if let Some(stored) = self.images.get_mut(&image) {
            stored.rois.push(roi);
        }
    }

    /// Returns the stored shape, bypassing group scoping.
    pub fn shape(&self, image: ImageID, shape: ShapeID) -> Option<&Shape> {
        self.images
            .get(&image)
            .and_then(|stored| crate::api::find_shape(&stored.rois, shape))
    }

    /// Returns the stored parents of an image, bypassing group scoping.
    pub fn image_parents(&self, image: ImageID) -> &[DatasetID] {
        self.images
            .get(&image)
            .map(|stored| stored.image.parents())
            .unwrap_or_default()
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        self.datasets.values().map(|(_, d)| d.name()).collect()
    }

    /// Every link operation performed, in order.
    pub fn links(&self) -> &[(DatasetID, ImageID)] {
        &self.links
    }

    /// Every successful shape save, in order.
    pub fn saves(&self) -> &[(ImageID, ShapeID)] {
        &self.saves
    }

    /// Makes every save of this shape fail with a server error.
    pub fn fail_saves_for(&mut self, shape: ShapeID) {
        self.failing_saves.insert(shape);
    }

    /// Makes every lookup of this image fail with a server error.
    pub fn fail_lookups_for(&mut self, image: ImageID) {
        self.failing_lookups.insert(image);
    }

    pub fn active_group(&self) -> Option<GroupID> {
        self.group
    }

    /// Number of times the service was closed.
    pub fn close_count(&self) -> u32 {
        self.closed
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed > 0 {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn visible(&self, group: GroupID) -> bool {
        self.group.is_none_or(|active| active == group)
    }

    fn visible_image(&self, image_id: ImageID) -> Result<Option<&StoredImage>, Error> {
        self.ensure_open()?;
        if self.failing_lookups.contains(&image_id) {
            return Err(Error::ServerError(500, format!("lookup of image {} failed", image_id)));
        }
        Ok(self
            .images
            .get(&image_id)
            .filter(|stored| self.visible(stored.group)))
    }
}

impl ObjectService for MemoryService {
    async fn groups(&self) -> Result<Vec<Group>, Error> {
        self.ensure_open()?;
        Ok(self.groups.clone())
    }

    async fn set_group(&mut self, group_id: GroupID) -> Result<(), Error> {
        self.ensure_open()?;
        self.group = Some(group_id);
        Ok(())
    }

    async fn datasets(&self) -> Result<Vec<Dataset>, Error> {
        self.ensure_open()?;
        Ok(self
            .datasets
            .values()
            .filter(|(group, _)| self.visible(*group))
            .map(|(_, dataset)| dataset.clone())
            .collect())
    }

    async fn dataset(&self, dataset_id: DatasetID) -> Result<Option<Dataset>, Error> {
        self.ensure_open()?;
        Ok(self
            .datasets
            .get(&dataset_id)
            .filter(|(group, _)| self.visible(*group))
            .map(|(_, dataset)| dataset.clone()))
    }

    async fn create_dataset(&mut self, name: &str) -> Result<Dataset, Error> {
        self.ensure_open()?;
        let group = self.group.ok_or(Error::InvalidResponse)?;
        let id = self.add_dataset(group, name);
        debug!("MemoryService created dataset {} ({})", id, name);
        Ok(Dataset::new(id, name))
    }

    async fn image(&self, image_id: ImageID) -> Result<Option<Image>, Error> {
        Ok(self
            .visible_image(image_id)?
            .map(|stored| stored.image.clone()))
    }

    async fn rois(&self, image_id: ImageID) -> Result<Vec<Roi>, Error> {
        Ok(self
            .visible_image(image_id)?
            .map(|stored| stored.rois.clone())
            .unwrap_or_default())
    }

    async fn link_image(
        &mut self,
        dataset_id: DatasetID,
        image_id: ImageID,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        if !self.datasets.contains_key(&dataset_id) {
            return Err(Error::ServerError(
                404,
                format!("dataset {} not found", dataset_id),
            ));
        }
        let stored = self
            .images
            .get_mut(&image_id)
            .ok_or_else(|| Error::ServerError(404, format!("image {} not found", image_id)))?;
        stored.image.add_parent(dataset_id);
        self.links.push((dataset_id, image_id));
        Ok(())
    }

    async fn save_shape(&mut self, image_id: ImageID, shape: &Shape) -> Result<Shape, Error> {
        self.ensure_open()?;
        if self.failing_saves.contains(&shape.id()) {
            return Err(Error::ServerError(
                500,
                format!("save of shape {} rejected", shape.id()),
            ));
        }

        let stored = self
            .images
            .get_mut(&image_id)
            .ok_or_else(|| Error::ServerError(404, format!("image {} not found", image_id)))?;
        let target = stored
            .rois
            .iter_mut()
            .flat_map(|roi| roi.shapes_mut().iter_mut())
            .find(|s| s.id() == shape.id())
            .ok_or_else(|| Error::ServerError(404, format!("shape {} not found", shape.id())))?;

        *target = shape.clone();
        self.saves.push((image_id, shape.id()));
        Ok(shape.clone())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.closed += 1;
        Ok(())
    }
}
