// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// OME schema type for datasets, used when creating objects through the save
/// endpoint.
pub(crate) const DATASET_TYPE: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06#Dataset";

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }

        impl From<$name> for u64 {
            fn from(val: $name) -> Self {
                val.0
            }
        }

        impl $name {
            pub const fn new(id: u64) -> Self {
                $name(id)
            }

            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            /// Accepts a bare integer or the `Kind:123` form used by OMERO
            /// clients.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                let digits = s
                    .strip_prefix(concat!($kind, ":"))
                    .unwrap_or(s);
                Ok($name(digits.parse()?))
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                $name::from_str(s)
            }
        }
    };
}

object_id!(
    /// Identifier of an experimenter group, the access-control scope for
    /// every query made through a session.
    GroupID,
    "ExperimenterGroup"
);

object_id!(
    /// Identifier of a dataset, the collection images are linked into.
    DatasetID,
    "Dataset"
);

object_id!(
    /// Identifier of an image.
    ImageID,
    "Image"
);

object_id!(RoiID, "Roi");

object_id!(
    /// Identifier of a shape. Shape identifiers are only looked up within the
    /// ROIs of a single image.
    ShapeID,
    "Shape"
);

/// An experimenter group the current user is a member of.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Group {
    #[serde(rename = "@id")]
    id: GroupID,
    #[serde(rename = "Name")]
    name: String,
}

impl Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ID: {} - Name: {}", self.id, self.name)
    }
}

impl Group {
    pub fn new(id: GroupID, name: &str) -> Self {
        Group {
            id,
            name: name.to_string(),
        }
    }

    pub fn id(&self) -> GroupID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A dataset, the collection updated images are linked into.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Dataset {
    #[serde(rename = "@id")]
    id: DatasetID,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    description: Option<String>,
}

impl Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ID: {} - Name: {}", self.id, self.name)
    }
}

impl Dataset {
    pub fn new(id: DatasetID, name: &str) -> Self {
        Dataset {
            id,
            name: name.to_string(),
            description: None,
        }
    }

    pub fn id(&self) -> DatasetID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}

/// An image and the datasets it currently belongs to.
///
/// An image may be linked into several datasets. The parents are not part of
/// the image payload returned by the server; the client resolves them
/// separately when fetching the image.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Image {
    #[serde(rename = "@id")]
    id: ImageID,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(skip)]
    parents: Vec<DatasetID>,
}

impl Display for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.id, self.name)
    }
}

impl Image {
    pub fn new(id: ImageID, name: &str, parents: Vec<DatasetID>) -> Self {
        Image {
            id,
            name: name.to_string(),
            parents,
        }
    }

    pub fn id(&self) -> ImageID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parents(&self) -> &[DatasetID] {
        &self.parents
    }

    /// Whether the image is already linked into the dataset.
    pub fn in_dataset(&self, dataset: DatasetID) -> bool {
        self.parents.contains(&dataset)
    }

    pub(crate) fn set_parents(&mut self, parents: Vec<DatasetID>) {
        self.parents = parents;
    }

    pub(crate) fn add_parent(&mut self, dataset: DatasetID) {
        if !self.in_dataset(dataset) {
            self.parents.push(dataset);
        }
    }
}

/// A region of interest attached to an image, grouping one or more shapes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Roi {
    #[serde(rename = "@id")]
    id: RoiID,
    #[serde(default)]
    shapes: Vec<Shape>,
}

impl Roi {
    pub fn new(id: RoiID, shapes: Vec<Shape>) -> Self {
        Roi { id, shapes }
    }

    pub fn id(&self) -> RoiID {
        self.id
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub(crate) fn shapes_mut(&mut self) -> &mut Vec<Shape> {
        &mut self.shapes
    }
}

/// A shape with its text comment.
///
/// Every field of the server payload other than the identifier and the text
/// is kept in `extra` so that saving a shape writes back exactly what was
/// read, with only the text replaced.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Shape {
    #[serde(rename = "@id")]
    id: ShapeID,
    #[serde(rename = "Text", default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Shape {
    pub fn new(id: ShapeID, text: Option<&str>) -> Self {
        Shape {
            id,
            text: text.map(str::to_string),
            extra: serde_json::Map::new(),
        }
    }

    pub fn id(&self) -> ShapeID {
        self.id
    }

    /// The shape comment. A shape without a comment reads as the empty
    /// string.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn set_text(&mut self, text: &str) {
        self.text = Some(text.to_string());
    }

    /// The OME schema type of the shape, such as `...#Rectangle`.
    pub fn kind(&self) -> Option<&str> {
        self.extra.get("@type").and_then(|v| v.as_str())
    }
}

/// Returns the first shape with the given identifier, scanning the shapes of
/// every ROI in order.
pub fn find_shape(rois: &[Roi], shape_id: ShapeID) -> Option<&Shape> {
    rois.iter()
        .flat_map(|roi| roi.shapes().iter())
        .find(|shape| shape.id() == shape_id)
}

/// Session details returned by the server at login.
#[derive(Deserialize, Clone, Debug)]
pub(crate) struct EventContext {
    #[serde(rename = "userId")]
    pub(crate) user_id: u64,
    #[serde(rename = "userName", default)]
    pub(crate) user_name: String,
    #[serde(rename = "groupId")]
    pub(crate) group_id: GroupID,
}

#[derive(Deserialize)]
pub(crate) struct LoginResult {
    #[serde(default)]
    pub(crate) success: bool,
    #[serde(rename = "eventContext")]
    pub(crate) event_context: Option<EventContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_id_from_str_plain() {
        let id = ImageID::from_str("10").unwrap();
        assert_eq!(id.value(), 10);
    }

    #[test]
    fn test_image_id_from_str_prefixed() {
        let id = ImageID::from_str("Image:42").unwrap();
        assert_eq!(id.value(), 42);
    }

    #[test]
    fn test_dataset_id_rejects_other_prefix() {
        assert!(DatasetID::from_str("Image:42").is_err());
        assert!(DatasetID::from_str("abc").is_err());
        assert!(DatasetID::from_str("-3").is_err());
    }

    #[test]
    fn test_id_display_is_plain_integer() {
        assert_eq!(ShapeID::from(5).to_string(), "5");
        assert_eq!(format!("{}", GroupID::from(53)), "53");
    }

    #[test]
    fn test_shape_roundtrip_keeps_unknown_fields() {
        let json = r#"{
            "@id": 5,
            "@type": "http://www.openmicroscopy.org/Schemas/OME/2016-06#Rectangle",
            "Text": "foo",
            "X": 1.5,
            "TheZ": 0
        }"#;
        let mut shape: Shape = serde_json::from_str(json).unwrap();
        assert_eq!(shape.text(), "foo");
        assert_eq!(
            shape.kind(),
            Some("http://www.openmicroscopy.org/Schemas/OME/2016-06#Rectangle")
        );

        shape.set_text("bar");
        let value = serde_json::to_value(&shape).unwrap();
        assert_eq!(value["@id"], 5);
        assert_eq!(value["Text"], "bar");
        assert_eq!(value["X"], 1.5);
        assert_eq!(value["TheZ"], 0);
    }

    #[test]
    fn test_shape_without_text_reads_empty() {
        let shape: Shape = serde_json::from_str(r#"{"@id": 7}"#).unwrap();
        assert_eq!(shape.text(), "");
        let value = serde_json::to_value(&shape).unwrap();
        assert!(value.get("Text").is_none());
    }

    #[test]
    fn test_find_shape_first_match_across_rois() {
        let rois = vec![
            Roi::new(
                RoiID::from(1),
                vec![Shape::new(ShapeID::from(3), Some("a"))],
            ),
            Roi::new(
                RoiID::from(2),
                vec![
                    Shape::new(ShapeID::from(5), Some("first")),
                    Shape::new(ShapeID::from(5), Some("second")),
                ],
            ),
        ];

        let shape = find_shape(&rois, ShapeID::from(5)).unwrap();
        assert_eq!(shape.text(), "first");
        assert!(find_shape(&rois, ShapeID::from(9)).is_none());
        assert!(find_shape(&[], ShapeID::from(3)).is_none());
    }

    #[test]
    fn test_image_in_several_datasets() {
        let mut image = Image::new(
            ImageID::from(10),
            "cells.tif",
            vec![DatasetID::from(60), DatasetID::from(51)],
        );
        assert!(image.in_dataset(DatasetID::from(51)));
        assert!(!image.in_dataset(DatasetID::from(52)));

        image.add_parent(DatasetID::from(51));
        image.add_parent(DatasetID::from(52));
        assert_eq!(
            image.parents(),
            &[DatasetID::from(60), DatasetID::from(51), DatasetID::from(52)]
        );
    }

    #[test]
    fn test_roi_deserialize_without_shapes() {
        let roi: Roi = serde_json::from_str(r#"{"@id": 11}"#).unwrap();
        assert_eq!(roi.id(), RoiID::from(11));
        assert!(roi.shapes().is_empty());
    }

    #[test]
    fn test_login_result_parse() {
        let json = r#"{
            "success": true,
            "eventContext": {
                "userId": 2,
                "userName": "alice",
                "groupId": 3,
                "groupName": "lab",
                "sessionUuid": "abc"
            }
        }"#;
        let login: LoginResult = serde_json::from_str(json).unwrap();
        assert!(login.success);
        let ctx = login.event_context.unwrap();
        assert_eq!(ctx.user_id, 2);
        assert_eq!(ctx.user_name, "alice");
        assert_eq!(ctx.group_id, GroupID::from(3));
    }
}
