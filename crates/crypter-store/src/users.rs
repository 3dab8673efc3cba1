//! Typed reads over the `users` collection.

use uuid::Uuid;

use crypter_shared::Participant;

use crate::collection::Collection;
use crate::database::Database;
use crate::documents::from_document;
use crate::error::Result;

impl Database {
    /// Fetch a participant by uuid.
    pub fn get_user(&self, id: Uuid) -> Result<Option<Participant>> {
        self.get(Collection::Users, id)?
            .map(from_document)
            .transpose()
    }

    /// Fetch a participant, falling back to a bare `{uuid}` record when the
    /// reference has not been stored yet.
    pub(crate) fn user_or_stub(&self, id: Uuid) -> Result<Participant> {
        Ok(self.get_user(id)?.unwrap_or_else(|| Participant::new(id)))
    }
}
