use metrics::counter;
use thiserror::Error;
use tracing::info;

use policy_svc_core::{validation::Page, NewProduct, Product, ProductPatch, ValidationError};
use policy_svc_storage::{Database, ProductError, ProductRepository, StorageError};

/// CRUD over products. Also answers existence checks for the policy aggregate.
#[derive(Clone)]
pub struct ProductService {
    database: Database,
}

impl ProductService {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn repo(&self) -> ProductRepository {
        self.database.products()
    }

    pub async fn list(&self, page: Page) -> Result<Vec<Product>, ProductServiceError> {
        Ok(self.repo().list(page).await?)
    }

    pub async fn get(&self, code: &str) -> Result<Product, ProductServiceError> {
        self.repo()
            .fetch(code)
            .await
            .map_err(|err| ProductServiceError::from_repo(err, code))
    }

    pub async fn exists(&self, code: &str) -> Result<bool, StorageError> {
        self.repo().exists(code).await
    }

    pub async fn create(&self, payload: NewProduct) -> Result<Product, ProductServiceError> {
        payload.validate()?;
        let product = payload.into_product();
        let result = self
            .repo()
            .insert(&product)
            .await
            .map_err(|err| ProductServiceError::from_repo(err, &product.code));
        record_write("create", &result);
        result?;

        info!(stage = "product", code = %product.code, "product created");
        Ok(product)
    }

    pub async fn update(
        &self,
        code: &str,
        patch: ProductPatch,
    ) -> Result<Product, ProductServiceError> {
        patch.validate()?;
        let result = self
            .repo()
            .update(code, &patch)
            .await
            .map_err(|err| ProductServiceError::from_repo(err, code));
        record_write("update", &result);
        result
    }

    /// Removes a product. Policies that reference its code are not touched.
    pub async fn delete(&self, code: &str) -> Result<(), ProductServiceError> {
        let result = self
            .repo()
            .delete(code)
            .await
            .map_err(|err| ProductServiceError::from_repo(err, code));
        record_write("delete", &result);
        result?;

        info!(stage = "product", %code, "product deleted");
        Ok(())
    }
}

fn record_write<T>(op: &'static str, result: &Result<T, ProductServiceError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(ProductServiceError::Storage(_)) => "error",
        Err(_) => "rejected",
    };
    counter!("product_writes_total", "op" => op, "result" => outcome).increment(1);
}

#[derive(Debug, Error)]
pub enum ProductServiceError {
    #[error("product {0} not found")]
    NotFound(String),
    #[error("product {0} already exists")]
    DuplicateCode(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProductServiceError {
    fn from_repo(err: ProductError, code: &str) -> Self {
        match err {
            ProductError::NotFound => Self::NotFound(code.to_string()),
            ProductError::DuplicateCode => Self::DuplicateCode(code.to_string()),
            ProductError::Storage(err) => Self::Storage(err),
        }
    }
}
