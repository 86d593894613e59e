use log::info;
use mongodb::{
    bson::doc,
    error::Result,
    gridfs::GridFsBucket,
    options::{ClientOptions, GridFsBucketOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};

use crate::models::{Complaint, Notification, User};

pub const USERS: &str = "users";
pub const COMPLAINTS: &str = "complaints";
pub const NOTIFICATIONS: &str = "notifications";
pub const IMAGE_BUCKET: &str = "complaint_images";

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Result<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoDB { client, db })
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection(USERS)
    }

    pub fn complaints(&self) -> Collection<Complaint> {
        self.db.collection(COMPLAINTS)
    }

    pub fn notifications(&self) -> Collection<Notification> {
        self.db.collection(NOTIFICATIONS)
    }

    pub fn images(&self) -> GridFsBucket {
        self.db.gridfs_bucket(
            GridFsBucketOptions::builder()
                .bucket_name(IMAGE_BUCKET.to_string())
                .build(),
        )
    }

    /// Indexes the handlers rely on; creating an existing index is a no-op.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique = IndexOptions::builder().unique(true).build();

        self.users()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique.clone())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "user_id": 1 })
                    .options(unique.clone())
                    .build(),
                IndexModel::builder().keys(doc! { "role": 1 }).build(),
            ])
            .await?;

        self.complaints()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "complaint_id": 1 })
                    .options(unique.clone())
                    .build(),
                IndexModel::builder().keys(doc! { "user_id": 1 }).build(),
                IndexModel::builder().keys(doc! { "category": 1 }).build(),
            ])
            .await?;

        self.notifications()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "notification_id": 1 })
                    .options(unique)
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "read": 1 })
                    .build(),
                IndexModel::builder().keys(doc! { "complaint_id": 1 }).build(),
            ])
            .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }
}
