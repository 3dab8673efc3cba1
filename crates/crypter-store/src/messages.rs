//! Typed reads over the `messages` collection.

use uuid::Uuid;

use crypter_shared::{Conversation, Message};

use crate::collection::{Collection, Document, Query};
use crate::database::Database;
use crate::documents::{from_document, MessageDocument};
use crate::error::Result;

impl Database {
    /// Fetch a message by uuid with its conference and author hydrated.
    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.get(Collection::Messages, id)?
            .map(|doc| self.hydrate_message(doc))
            .transpose()
    }

    /// Run a query and hydrate every match, in query order.
    pub fn find_messages(&self, query: &Query) -> Result<Vec<Message>> {
        self.find(Collection::Messages, query)?
            .into_iter()
            .map(|doc| self.hydrate_message(doc))
            .collect()
    }

    pub(crate) fn hydrate_message(&self, doc: Document) -> Result<Message> {
        let stored: MessageDocument = from_document(doc)?;
        let conference = self
            .get_conference(stored.conference)?
            .unwrap_or_else(|| Conversation::new(stored.conference, 0));
        let author = self.user_or_stub(stored.author)?;
        Ok(stored.into_message(conference, author))
    }
}
