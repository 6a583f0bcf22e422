pub mod db;
pub mod model;

pub use db::{Collection, InsertOrder, Store, StoreError, CONTACT_MESSAGES, ITEM_OFFERS};
pub use model::{ContactFields, Fields, OfferFields, Record};
