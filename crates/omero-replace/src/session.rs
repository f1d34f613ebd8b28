// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Authenticated session bound to one active group.
//!
//! A [`Session`] owns the object service for the whole run. It must be
//! released exactly once; [`Session::scoped`] runs a stage of the pipeline
//! and closes the session afterwards whether the stage succeeded or not.

use crate::{
    Client, Error,
    api::{Dataset, DatasetID, Group, GroupID, Image, ImageID, Roi, Shape},
    service::ObjectService,
};
use log::{debug, info, warn};

/// Connection settings for [`Session::connect`].
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub host: String,
    pub username: String,
    pub password: String,
    pub server_id: u64,
    pub timeout: u64,
}

impl ConnectOptions {
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        ConnectOptions {
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            server_id: 1,
            timeout: 30,
        }
    }
}

#[derive(Debug)]
pub struct Session<S> {
    service: S,
    group: Option<Group>,
    closed: bool,
}

impl Session<Client> {
    /// Opens an authenticated session against an OMERO.web server.
    ///
    /// Every failure, including a malformed host or an unreachable server,
    /// is reported as [`Error::Authentication`].
    pub async fn connect(options: &ConnectOptions) -> Result<Self, Error> {
        let client = Client::with_timeout_secs(options.timeout)
            .and_then(|c| c.with_server(&options.host))
            .map_err(|e| Error::Authentication(e.to_string()))?
            .with_server_id(options.server_id)
            .with_login(&options.username, &options.password)
            .await?;

        info!(
            "Connected to {} as {}",
            client.url(),
            client.username().unwrap_or(&options.username)
        );
        Ok(Session::new(client))
    }
}

impl<S: ObjectService> Session<S> {
    /// Wraps an already authenticated service.
    pub fn new(service: S) -> Self {
        Session {
            service,
            group: None,
            closed: false,
        }
    }

    /// The underlying object service.
    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    /// The active group, once one is selected.
    pub fn group(&self) -> Option<&Group> {
        self.group.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Lists the groups the user is a member of. Fails with
    /// [`Error::NoGroups`] if there are none.
    pub async fn groups(&self) -> Result<Vec<Group>, Error> {
        self.ensure_open()?;
        let groups = self.service.groups().await?;
        if groups.is_empty() {
            return Err(Error::NoGroups);
        }
        Ok(groups)
    }

    /// Binds the session to one of the user's groups. Every later query is
    /// scoped to it.
    pub async fn select_group(&mut self, group_id: GroupID) -> Result<&Group, Error> {
        let group = self
            .groups()
            .await?
            .into_iter()
            .find(|g| g.id() == group_id)
            .ok_or_else(|| {
                Error::InvalidSelection(format!("group {} is not available", group_id))
            })?;

        self.service.set_group(group.id()).await?;
        info!("Using group {}", group);
        Ok(self.group.insert(group))
    }

    pub async fn datasets(&self) -> Result<Vec<Dataset>, Error> {
        self.ensure_open()?;
        self.service.datasets().await
    }

    pub async fn dataset(&self, dataset_id: DatasetID) -> Result<Option<Dataset>, Error> {
        self.ensure_open()?;
        self.service.dataset(dataset_id).await
    }

    pub async fn create_dataset(&mut self, name: &str) -> Result<Dataset, Error> {
        self.ensure_open()?;
        self.service.create_dataset(name).await
    }

    pub async fn image(&self, image_id: ImageID) -> Result<Option<Image>, Error> {
        self.ensure_open()?;
        self.service.image(image_id).await
    }

    pub async fn rois(&self, image_id: ImageID) -> Result<Vec<Roi>, Error> {
        self.ensure_open()?;
        self.service.rois(image_id).await
    }

    pub async fn link_image(
        &mut self,
        dataset_id: DatasetID,
        image_id: ImageID,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        self.service.link_image(dataset_id, image_id).await
    }

    pub async fn save_shape(&mut self, image_id: ImageID, shape: &Shape) -> Result<Shape, Error> {
        self.ensure_open()?;
        self.service.save_shape(image_id, shape).await
    }

    /// Releases the session. Only the first call reaches the server; later
    /// calls are no-ops.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing session");
        self.service.close().await
    }

    /// Runs `f` with the session and closes the session afterwards on every
    /// exit path. The result of `f` is returned; a failure to close is only
    /// logged so it never masks the outcome of `f`.
    pub async fn scoped<T, F>(&mut self, f: F) -> Result<T, Error>
    where
        F: AsyncFnOnce(&mut Session<S>) -> Result<T, Error>,
    {
        let result = f(&mut *self).await;
        if let Err(err) = self.close().await {
            warn!("Failed to close session: {}", err);
        }
        result
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryService;

    fn service() -> MemoryService {
        let mut service = MemoryService::new();
        service.add_group(GroupID::from(3), "lab");
        service.add_group(GroupID::from(4), "imaging");
        service
    }

    #[tokio::test]
    async fn test_select_group() -> Result<(), Error> {
        let mut session = Session::new(service());
        let group = session.select_group(GroupID::from(4)).await?;
        assert_eq!(group.name(), "imaging");
        assert_eq!(session.service().active_group(), Some(GroupID::from(4)));
        assert_eq!(session.group().map(|g| g.id()), Some(GroupID::from(4)));
        Ok(())
    }

    #[tokio::test]
    async fn test_select_unknown_group() {
        let mut session = Session::new(service());
        let result = session.select_group(GroupID::from(99)).await;
        assert!(matches!(result, Err(Error::InvalidSelection(_))));
        assert!(session.group().is_none());
        assert_eq!(session.service().active_group(), None);
    }

    #[tokio::test]
    async fn test_no_groups() {
        let session = Session::new(MemoryService::new());
        assert!(matches!(session.groups().await, Err(Error::NoGroups)));
    }

    #[tokio::test]
    async fn test_close_exactly_once() -> Result<(), Error> {
        let mut session = Session::new(service());
        session.close().await?;
        session.close().await?;
        assert!(session.is_closed());
        assert_eq!(session.service().close_count(), 1);
        assert!(matches!(session.datasets().await, Err(Error::SessionClosed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_scoped_closes_on_success() -> Result<(), Error> {
        let mut session = Session::new(service());
        let name = session
            .scoped(async |s| {
                let group = s.select_group(GroupID::from(3)).await?;
                Ok(group.name().to_string())
            })
            .await?;
        assert_eq!(name, "lab");
        assert_eq!(session.service().close_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_scoped_closes_on_error() {
        let mut session = Session::new(service());
        let result = session
            .scoped(async |s| s.select_group(GroupID::from(42)).await.map(|_| ()))
            .await;
        assert!(matches!(result, Err(Error::InvalidSelection(_))));
        assert_eq!(session.service().close_count(), 1);
    }
}
