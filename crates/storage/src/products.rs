use policy_svc_core::{validation::Page, Product, ProductPatch};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::{decimal_text, is_unique_violation, parse_decimal, StorageError};

/// Repository for the `products` table.
#[derive(Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a product. A second product with the same code is rejected.
    pub async fn insert(&self, product: &Product) -> Result<(), ProductError> {
        sqlx::query(
            "INSERT INTO products (code, name, description, product_type, base_premium) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&product.code)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.product_type)
        .bind(decimal_text(product.base_premium))
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ProductError::DuplicateCode
            } else {
                ProductError::from(err)
            }
        })?;

        Ok(())
    }

    pub async fn fetch(&self, code: &str) -> Result<Product, ProductError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ProductError::NotFound)?;

        Ok(row.into_domain()?)
    }

    /// Returns `true` when a product with the given code is registered.
    pub async fn exists(&self, code: &str) -> Result<bool, StorageError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM products WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Lists products ordered by code.
    pub async fn list(&self, page: Page) -> Result<Vec<Product>, StorageError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY code LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProductRow::into_domain).collect()
    }

    /// Writes the fields set on `patch` and returns the stored row.
    ///
    /// Unset fields bind as NULL and keep their current value, so concurrent
    /// patches to different fields do not overwrite each other.
    pub async fn update(
        &self,
        code: &str,
        patch: &ProductPatch,
    ) -> Result<Product, ProductError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "UPDATE products \
             SET name = COALESCE(?, name), \
                 description = COALESCE(?, description), \
                 product_type = COALESCE(?, product_type), \
                 base_premium = COALESCE(?, base_premium) \
             WHERE code = ? \
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(&patch.product_type)
        .bind(patch.base_premium.map(decimal_text))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ProductError::NotFound)?;

        Ok(row.into_domain()?)
    }

    /// Deletes the product. Policies referencing the code are left untouched.
    pub async fn delete(&self, code: &str) -> Result<(), ProductError> {
        let result = sqlx::query("DELETE FROM products WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ProductError::NotFound);
        }
        Ok(())
    }
}

const PRODUCT_COLUMNS: &str = "code, name, description, product_type, base_premium";

/// Errors raised by [`ProductRepository`].
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("product not found")]
    NotFound,
    #[error("a product with the same code already exists")]
    DuplicateCode,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for ProductError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    code: String,
    name: String,
    description: Option<String>,
    product_type: Option<String>,
    base_premium: String,
}

impl ProductRow {
    fn into_domain(self) -> Result<Product, StorageError> {
        Ok(Product {
            base_premium: parse_decimal("base_premium", &self.base_premium)?,
            code: self.code,
            name: self.name,
            description: self.description,
            product_type: self.product_type,
        })
    }
}
