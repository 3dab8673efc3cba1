//! Typed reads over the `conferences` collection.
//!
//! The stored `participant` id is hydrated to a full user record, and the
//! `last_message` snapshot gets its author hydrated. The snapshot's own
//! `conference` is left as a `{uuid, updated_at}` stub.

use uuid::Uuid;

use crypter_shared::{Conversation, Message};

use crate::collection::{Collection, Document, Filter, Order, Query};
use crate::database::Database;
use crate::documents::{from_document, ConferenceDocument};
use crate::error::Result;

impl Database {
    /// Fetch a conversation by uuid.
    pub fn get_conference(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.get(Collection::Conferences, id)?
            .map(|doc| self.hydrate_conference(doc))
            .transpose()
    }

    /// The private conversation held with `participant`, if known locally.
    pub fn get_conference_by_participant(&self, participant: Uuid) -> Result<Option<Conversation>> {
        let query = Query::new()
            .filter(Filter::Participant(participant))
            .order(Order::Desc)
            .limit(1);
        Ok(self.find_conferences(&query)?.into_iter().next())
    }

    /// Run a query and hydrate every match.
    pub fn find_conferences(&self, query: &Query) -> Result<Vec<Conversation>> {
        self.find(Collection::Conferences, query)?
            .into_iter()
            .map(|doc| self.hydrate_conference(doc))
            .collect()
    }

    pub(crate) fn hydrate_conference(&self, doc: Document) -> Result<Conversation> {
        let stored: ConferenceDocument = from_document(doc)?;

        let participant = stored
            .participant
            .map(|id| self.user_or_stub(id))
            .transpose()?;

        let last_message = match stored.last_message.clone() {
            Some(snapshot) => {
                let author = self.user_or_stub(snapshot.author)?;
                let stub = Conversation::new(stored.uuid, stored.updated_at);
                Some(snapshot.into_message(stub, author))
            }
            None => None::<Message>,
        };

        Ok(stored.into_conversation(participant, last_message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{conference_document, user_document};
    use crypter_shared::Participant;

    fn store_conversation(db: &Database, c: &Conversation) {
        if let Some(p) = &c.participant {
            let doc = user_document(p).unwrap();
            db.upsert(Collection::Users, p.uuid, |_| doc).unwrap();
        }
        let doc = conference_document(c).unwrap();
        db.upsert(Collection::Conferences, c.uuid, |_| doc).unwrap();
    }

    #[test]
    fn participant_is_hydrated() {
        let db = Database::open_in_memory().unwrap();
        let bob = Participant {
            name: Some("bob".into()),
            ..Participant::new(Uuid::new_v4())
        };
        let c = Conversation {
            participant: Some(bob.clone()),
            ..Conversation::new(Uuid::new_v4(), 100)
        };
        store_conversation(&db, &c);

        let loaded = db.get_conference(c.uuid).unwrap().unwrap();
        assert_eq!(loaded.participant, Some(bob.clone()));
        assert_eq!(
            db.get_conference_by_participant(bob.uuid).unwrap().map(|c| c.uuid),
            Some(c.uuid)
        );
    }

    #[test]
    fn old_direction_is_newest_first() {
        let db = Database::open_in_memory().unwrap();
        for ts in [10, 30, 20] {
            store_conversation(&db, &Conversation::new(Uuid::new_v4(), ts));
        }

        let page = db
            .find_conferences(&Query::new().filter(Filter::Before(30)).order(Order::Desc))
            .unwrap();
        let stamps: Vec<i64> = page.iter().map(|c| c.updated_at).collect();
        assert_eq!(stamps, vec![20, 10]);
    }
}
