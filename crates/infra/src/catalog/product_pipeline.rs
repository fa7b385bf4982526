//! Product mutations and reads.
//!
//! Mutations run strictly in order with no compensation:
//!
//! - create: `upload image -> write row -> publish "product-created"`
//! - update: `upload replacement image (optional) -> conditional write -> publish "product-updated"`
//! - delete: conditional soft delete, no event
//!
//! A failure stops the sequence at that step. Failures after the store write
//! leave the row committed and say so through [`PipelineError::committed`].
//! Blobs uploaded for a mutation that then fails are left behind.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use catalog_core::{CatalogError, CatalogResult, CategoryId, ProductId};
use catalog_events::{Broker, Event, IntegrationEvent};
use catalog_products::{NewProduct, Product, ProductEvent, ProductPatch, Sku};

use super::error::{PipelineError, PipelineStep};
use super::fan_out::CategoryFanOut;
use crate::blob::{BlobStore, image_object_path};
use crate::repository::{ProductChanges, ProductRepository};
use crate::store::ItemStore;

pub struct ProductPipeline<S, O, B> {
    products: ProductRepository<S>,
    blobs: O,
    broker: B,
    fan_out: CategoryFanOut,
}

impl<S, O, B> ProductPipeline<S, O, B>
where
    S: ItemStore + Clone + 'static,
    O: BlobStore,
    B: Broker,
{
    pub fn new(store: S, blobs: O, broker: B) -> Self {
        Self {
            products: ProductRepository::new(store),
            blobs,
            broker,
            fan_out: CategoryFanOut::unbounded(),
        }
    }

    pub fn with_fan_out(mut self, fan_out: CategoryFanOut) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub async fn create(&self, mut new: NewProduct) -> Result<Product, PipelineError> {
        new.validate()
            .map_err(|e| PipelineError::new(PipelineStep::Validate, e))?;

        let now = Utc::now();
        let id = ProductId::new();
        let sku = Sku::generate(now);

        let bytes = std::mem::take(&mut new.image.bytes);
        let image_url = self
            .upload(&new.image.extension(), &new.image.content_type, bytes)
            .await?;

        let product = Product::from_new(&new, id, sku, image_url, now);
        self.products
            .put(&product)
            .await
            .map_err(|e| PipelineError::new(PipelineStep::Store, e))?;
        info!(product_id = %product.id, category_id = %product.category_id, sku = %product.sku, "product created");

        self.publish_committed(ProductEvent::created(&product), product).await
    }

    pub async fn update(&self, patch: ProductPatch) -> Result<Product, PipelineError> {
        patch
            .validate()
            .map_err(|e| PipelineError::new(PipelineStep::Validate, e))?;

        let ProductPatch {
            id,
            category_id,
            name,
            description,
            price,
            image,
        } = patch;

        let image_url = match image {
            Some(image) => Some(
                self.upload(&image.extension(), &image.content_type, image.bytes)
                    .await?,
            ),
            None => None,
        };

        let changes = ProductChanges {
            name,
            description,
            price,
            image_url,
        };
        let product = self
            .products
            .update(id, category_id, changes, Utc::now())
            .await
            .map_err(|e| PipelineError::new(PipelineStep::Store, e))?;
        info!(product_id = %id, category_id = %category_id, "product updated");

        self.publish_committed(ProductEvent::updated(&product), product).await
    }

    pub async fn delete(&self, id: ProductId, category_id: CategoryId) -> CatalogResult<()> {
        self.products.soft_delete(id, category_id, Utc::now()).await?;
        info!(product_id = %id, category_id = %category_id, "product deleted");
        Ok(())
    }

    pub async fn get_products(&self) -> CatalogResult<Vec<Product>> {
        Ok(self.products.list().await?)
    }

    pub async fn get_product_by_id(&self, id: ProductId) -> CatalogResult<Product> {
        self.products
            .find_live(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("product {id}")))
    }

    pub async fn get_products_by_category(&self, category_id: CategoryId) -> CatalogResult<Vec<Product>> {
        Ok(self.products.by_category(category_id).await?)
    }

    /// Products of every listed category, queried concurrently.
    pub async fn get_products_by_categories(
        &self,
        category_ids: &[CategoryId],
        cancel: &CancellationToken,
    ) -> CatalogResult<Vec<Product>> {
        self.fan_out
            .run(category_ids, cancel, |category_id| {
                let products = self.products.clone();
                async move {
                    products
                        .by_category(category_id)
                        .await
                        .map_err(CatalogError::from)
                }
            })
            .await
    }

    async fn upload(
        &self,
        extension: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, PipelineError> {
        let path = image_object_path(extension);
        self.blobs
            .put(&path, bytes, content_type)
            .await
            .map_err(|e| {
                error!(path = %path, error = %e, "image upload failed");
                PipelineError::new(PipelineStep::Upload, e)
            })
    }

    async fn publish_committed(&self, event: ProductEvent, product: Product) -> Result<Product, PipelineError> {
        match self.publish(&event).await {
            Ok(()) => Ok(product),
            Err(e) => {
                error!(
                    product_id = %product.id,
                    topic = event.topic(),
                    event_type = event.event_type(),
                    error = %e,
                    "publish failed after commit"
                );
                Err(PipelineError::after_commit(PipelineStep::Publish, e, product))
            }
        }
    }

    async fn publish(&self, event: &ProductEvent) -> CatalogResult<()> {
        let payload = event.encode()?;
        self.broker.publish(event.topic(), &event.key(), &payload).await?;
        debug!(
            topic = event.topic(),
            event_type = event.event_type(),
            version = event.version(),
            occurred_at = %event.occurred_at(),
            "event published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::store::InMemoryItemStore;
    use catalog_core::{Price, Quantity};
    use catalog_events::InMemoryBroker;
    use catalog_products::{ImageUpload, topics};

    type Pipeline = ProductPipeline<Arc<InMemoryItemStore>, Arc<InMemoryBlobStore>, Arc<InMemoryBroker>>;

    fn setup() -> (Pipeline, Arc<InMemoryItemStore>, Arc<InMemoryBlobStore>, Arc<InMemoryBroker>) {
        let store = Arc::new(InMemoryItemStore::new());
        let blobs = Arc::new(InMemoryBlobStore::default());
        let broker = Arc::new(InMemoryBroker::new());
        let pipeline = ProductPipeline::new(store.clone(), blobs.clone(), broker.clone());
        (pipeline, store, blobs, broker)
    }

    fn new_product(category_id: CategoryId) -> NewProduct {
        NewProduct {
            name: "Runner".to_string(),
            description: "light".to_string(),
            price: Price::new(Decimal::new(4999, 2)).unwrap(),
            quantity: Quantity::new(3),
            category_id,
            image: ImageUpload::new("runner.png", "image/png", vec![1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn create_uploads_stores_and_publishes() {
        let (pipeline, _, blobs, broker) = setup();
        let product = pipeline.create(new_product(CategoryId::new())).await.unwrap();

        assert!(product.image_url.starts_with("https://cdn.test/product/"));
        assert!(product.image_url.ends_with(".png"));
        assert_eq!(blobs.len(), 1);
        assert!(product.sku.as_str().starts_with("SKU-"));

        let published = broker.published(Some(topics::PRODUCT_CREATED));
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, product.id.to_string().into_bytes());
    }

    #[tokio::test]
    async fn invalid_input_fails_before_upload() {
        let (pipeline, _, blobs, _) = setup();
        let mut input = new_product(CategoryId::new());
        input.name = "  ".to_string();
        let err = pipeline.create(input).await.unwrap_err();
        assert_eq!(err.step, PipelineStep::Validate);
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn store_failure_aborts_before_publish() {
        let (pipeline, store, _, broker) = setup();
        store.set_failing(true);
        let err = pipeline.create(new_product(CategoryId::new())).await.unwrap_err();
        assert_eq!(err.step, PipelineStep::Store);
        assert!(!err.is_committed());
        assert!(broker.published(None).is_empty());
    }

    #[tokio::test]
    async fn update_without_image_skips_upload_and_publishes_new_state() {
        let (pipeline, _, blobs, broker) = setup();
        let created = pipeline.create(new_product(CategoryId::new())).await.unwrap();

        let patch = ProductPatch::new(created.id, created.category_id).with_name("Racer");
        let updated = pipeline.update(patch).await.unwrap();
        assert_eq!(updated.name, "Racer");
        assert_eq!(updated.image_url, created.image_url);
        assert_eq!(blobs.len(), 1);

        let events = broker.published(Some(topics::PRODUCT_UPDATED));
        assert_eq!(events.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&events[0].payload).unwrap();
        assert_eq!(body["product_name"], "Racer");
    }

    #[tokio::test]
    async fn update_of_deleted_product_fails_at_store_and_publishes_nothing() {
        let (pipeline, _, blobs, broker) = setup();
        let created = pipeline.create(new_product(CategoryId::new())).await.unwrap();
        pipeline.delete(created.id, created.category_id).await.unwrap();

        let patch = ProductPatch::new(created.id, created.category_id)
            .with_image(ImageUpload::new("b.jpg", "image/jpeg", vec![9]));
        let err = pipeline.update(patch).await.unwrap_err();
        assert_eq!(err.step, PipelineStep::Store);
        assert!(matches!(err.source, CatalogError::NotFound(_)));
        // The replacement image was uploaded before the write failed.
        assert_eq!(blobs.len(), 2);
        assert!(broker.published(Some(topics::PRODUCT_UPDATED)).is_empty());
    }

    #[tokio::test]
    async fn delete_twice_fails_and_emits_no_event() {
        let (pipeline, _, _, broker) = setup();
        let created = pipeline.create(new_product(CategoryId::new())).await.unwrap();
        pipeline.delete(created.id, created.category_id).await.unwrap();

        let again = pipeline.delete(created.id, created.category_id).await;
        assert!(matches!(again, Err(CatalogError::NotFound(_))));
        assert!(matches!(
            pipeline.get_product_by_id(created.id).await,
            Err(CatalogError::NotFound(_))
        ));
        assert_eq!(broker.published(None).len(), 1);
    }

    #[tokio::test]
    async fn delete_with_wrong_category_fails() {
        let (pipeline, _, _, _) = setup();
        let created = pipeline.create(new_product(CategoryId::new())).await.unwrap();
        let result = pipeline.delete(created.id, CategoryId::new()).await;
        assert!(matches!(result, Err(CatalogError::NotFound(_))));
        assert!(pipeline.get_product_by_id(created.id).await.is_ok());
    }
}
