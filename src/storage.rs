use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::cmp::Reverse;
use std::path::Path;

use crate::models::{
    AdminUser, DashboardMetrics, ExpenseByCategorySummary, ExpenseSummary, Product,
    PurchaseSummary, SalesSummary, User,
};

const POPULAR_PRODUCTS: usize = 15;
const RECENT_SUMMARIES: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{0}")]
    Duplicate(String),
}

/// Handle to the Sled database. Cheap to clone; every clone shares the same trees.
#[derive(Clone)]
pub struct Storage {
    db: Db,
    admins: Tree,
    admin_emails: Tree, // email -> adminUserId
    products: Tree,
    users: Tree,
    sales_summaries: Tree,
    purchase_summaries: Tree,
    expense_summaries: Tree,
    expenses_by_category: Tree,
}

impl Storage {
    /// Open or create the Sled database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        Ok(Self {
            admins: db.open_tree("admin_users")?,
            admin_emails: db.open_tree("admin_emails")?,
            products: db.open_tree("products")?,
            users: db.open_tree("users")?,
            sales_summaries: db.open_tree("sales_summaries")?,
            purchase_summaries: db.open_tree("purchase_summaries")?,
            expense_summaries: db.open_tree("expense_summaries")?,
            expenses_by_category: db.open_tree("expenses_by_category")?,
            db,
        })
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }

    // --- Admin users ---

    /// Insert a new admin. Fails with `Duplicate` if the email or id is taken.
    pub fn create_admin(&self, admin: AdminUser) -> Result<AdminUser, StorageError> {
        let bytes = serde_json::to_vec(&admin)?;
        let id = admin.admin_user_id.as_bytes();
        let email = admin.email.as_bytes();

        let outcome = (&self.admins, &self.admin_emails).transaction(|(admins, emails)| {
            if emails.get(email)?.is_some() {
                return Err(ConflictableTransactionError::Abort(StorageError::Duplicate(
                    "Email already in use".into(),
                )));
            }
            if admins.get(id)?.is_some() {
                return Err(ConflictableTransactionError::Abort(StorageError::Duplicate(
                    "Admin user id already in use".into(),
                )));
            }
            emails.insert(email, id)?;
            admins.insert(id, bytes.as_slice())?;
            Ok(())
        });

        match outcome {
            Ok(()) => Ok(admin),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    pub fn admin_by_id(&self, id: &str) -> Result<Option<AdminUser>, StorageError> {
        get(&self.admins, id)
    }

    pub fn admin_by_email(&self, email: &str) -> Result<Option<AdminUser>, StorageError> {
        match self.admin_emails.get(email.as_bytes())? {
            Some(id) => get(&self.admins, &String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    pub fn rename_admin(&self, id: &str, name: &str) -> Result<Option<AdminUser>, StorageError> {
        self.modify_admin(id, |admin| admin.name = name.to_owned())
    }

    /// Overwrite the subscription flags of the admin owning `email`.
    /// Returns `None` when no admin has that email.
    pub fn set_entitlement(
        &self,
        email: &str,
        has_access: bool,
        price_id: Option<&str>,
    ) -> Result<Option<AdminUser>, StorageError> {
        let Some(id) = self.admin_emails.get(email.as_bytes())? else {
            return Ok(None);
        };
        self.modify_admin(&String::from_utf8_lossy(&id), |admin| {
            admin.has_access = has_access;
            admin.price_id = price_id.map(str::to_owned);
        })
    }

    /// Atomic read-modify-write of a single admin row.
    fn modify_admin<F>(&self, id: &str, mut change: F) -> Result<Option<AdminUser>, StorageError>
    where
        F: FnMut(&mut AdminUser),
    {
        let mut codec_error = None;
        let updated = self.admins.update_and_fetch(id.as_bytes(), |old| {
            let old = old?;
            let encoded = serde_json::from_slice::<AdminUser>(old).and_then(|mut admin| {
                change(&mut admin);
                serde_json::to_vec(&admin)
            });
            match encoded {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    codec_error = Some(e);
                    Some(old.to_vec())
                }
            }
        })?;

        if let Some(e) = codec_error {
            return Err(e.into());
        }
        Ok(updated
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    /// Remove every admin account. Returns how many were removed.
    pub fn clear_admins(&self) -> Result<usize, StorageError> {
        let count = self.admins.len();
        self.admins.clear()?;
        self.admin_emails.clear()?;
        Ok(count)
    }

    // --- Products ---

    /// All products, or those whose name contains `search` (case-insensitive).
    pub fn list_products(&self, search: Option<&str>) -> Result<Vec<Product>, StorageError> {
        let products: Vec<Product> = scan(&self.products)?;
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        Ok(match needle {
            Some(needle) => products
                .into_iter()
                .filter(|p| p.name.to_lowercase().contains(&needle))
                .collect(),
            None => products,
        })
    }

    pub fn insert_product(&self, product: &Product) -> Result<(), StorageError> {
        put(&self.products, &product.product_id, product)
    }

    pub fn delete_product(&self, id: &str) -> Result<Option<Product>, StorageError> {
        match self.products.remove(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // --- Users ---

    pub fn list_users(&self) -> Result<Vec<User>, StorageError> {
        scan(&self.users)
    }

    pub fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        put(&self.users, &user.user_id, user)
    }

    // --- Expenses and dashboard summaries ---

    /// Newest first.
    pub fn list_expenses_by_category(&self) -> Result<Vec<ExpenseByCategorySummary>, StorageError> {
        let mut rows: Vec<ExpenseByCategorySummary> = scan(&self.expenses_by_category)?;
        rows.sort_by_key(|r| Reverse(r.date));
        Ok(rows)
    }

    pub fn insert_expense_by_category(
        &self,
        row: &ExpenseByCategorySummary,
    ) -> Result<(), StorageError> {
        put(&self.expenses_by_category, &row.expense_by_category_summary_id, row)
    }

    pub fn insert_sales_summary(&self, row: &SalesSummary) -> Result<(), StorageError> {
        put(&self.sales_summaries, &row.sales_summary_id, row)
    }

    pub fn insert_purchase_summary(&self, row: &PurchaseSummary) -> Result<(), StorageError> {
        put(&self.purchase_summaries, &row.purchase_summary_id, row)
    }

    pub fn insert_expense_summary(&self, row: &ExpenseSummary) -> Result<(), StorageError> {
        put(&self.expense_summaries, &row.expense_summary_id, row)
    }

    pub fn dashboard_metrics(&self) -> Result<DashboardMetrics, StorageError> {
        let mut popular_products: Vec<Product> = scan(&self.products)?;
        popular_products.sort_by_key(|p| Reverse(p.stock_quantity));
        popular_products.truncate(POPULAR_PRODUCTS);

        let mut sales_summary: Vec<SalesSummary> = scan(&self.sales_summaries)?;
        sales_summary.sort_by_key(|r| Reverse(r.date));
        sales_summary.truncate(RECENT_SUMMARIES);

        let mut purchase_summary: Vec<PurchaseSummary> = scan(&self.purchase_summaries)?;
        purchase_summary.sort_by_key(|r| Reverse(r.date));
        purchase_summary.truncate(RECENT_SUMMARIES);

        let mut expense_summary: Vec<ExpenseSummary> = scan(&self.expense_summaries)?;
        expense_summary.sort_by_key(|r| Reverse(r.date));
        expense_summary.truncate(RECENT_SUMMARIES);

        let mut expense_by_category_summary = self.list_expenses_by_category()?;
        expense_by_category_summary.truncate(RECENT_SUMMARIES);

        Ok(DashboardMetrics {
            popular_products,
            sales_summary,
            purchase_summary,
            expense_summary,
            expense_by_category_summary,
        })
    }
}

fn get<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>, StorageError> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn put<T: Serialize>(tree: &Tree, key: &str, value: &T) -> Result<(), StorageError> {
    tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
    Ok(())
}

fn scan<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
    tree.iter()
        .values()
        .map(|item| Ok(serde_json::from_slice(&item?)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn admin(id: &str, email: &str) -> AdminUser {
        AdminUser {
            admin_user_id: id.to_string(),
            name: "A".to_string(),
            email: email.to_string(),
            password: "hash".to_string(),
            has_access: false,
            price_id: None,
        }
    }

    fn product(id: &str, name: &str, stock: i64) -> Product {
        Product {
            product_id: id.to_string(),
            name: name.to_string(),
            price: 9.5,
            rating: None,
            stock_quantity: stock,
        }
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let storage = Storage::temporary().unwrap();
        storage.create_admin(admin("a1", "a@x.com")).unwrap();

        let err = storage.create_admin(admin("a2", "a@x.com")).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));
        // The failed insert must not leave a half-written row behind.
        assert!(storage.admin_by_id("a2").unwrap().is_none());
    }

    #[test]
    fn entitlement_overwrite_is_idempotent() {
        let storage = Storage::temporary().unwrap();
        storage.create_admin(admin("a1", "a@x.com")).unwrap();

        for _ in 0..2 {
            let updated = storage
                .set_entitlement("a@x.com", true, Some("price_pro"))
                .unwrap()
                .unwrap();
            assert!(updated.has_access);
            assert_eq!(updated.price_id.as_deref(), Some("price_pro"));
        }

        let revoked = storage.set_entitlement("a@x.com", false, None).unwrap().unwrap();
        assert!(!revoked.has_access);
        assert_eq!(revoked.price_id, None);
        assert_eq!(revoked.name, "A");
    }

    #[test]
    fn entitlement_for_unknown_email_is_none() {
        let storage = Storage::temporary().unwrap();
        assert!(storage.set_entitlement("nobody@x.com", false, None).unwrap().is_none());
    }

    #[test]
    fn rename_keeps_other_fields() {
        let storage = Storage::temporary().unwrap();
        storage.create_admin(admin("a1", "a@x.com")).unwrap();
        let renamed = storage.rename_admin("a1", "Alice").unwrap().unwrap();
        assert_eq!(renamed.name, "Alice");
        assert_eq!(renamed.email, "a@x.com");
        assert!(storage.rename_admin("missing", "Bob").unwrap().is_none());
    }

    #[test]
    fn clear_admins_frees_emails() {
        let storage = Storage::temporary().unwrap();
        storage.create_admin(admin("a1", "a@x.com")).unwrap();
        assert_eq!(storage.clear_admins().unwrap(), 1);
        storage.create_admin(admin("a2", "a@x.com")).unwrap();
        assert_eq!(storage.admin_by_email("a@x.com").unwrap().unwrap().admin_user_id, "a2");
    }

    #[test]
    fn product_search_is_case_insensitive() {
        let storage = Storage::temporary().unwrap();
        storage.insert_product(&product("p1", "Blue Widget", 3)).unwrap();
        storage.insert_product(&product("p2", "Red Gadget", 7)).unwrap();

        let found = storage.list_products(Some("WIDGET")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].product_id, "p1");
        assert_eq!(storage.list_products(Some("  ")).unwrap().len(), 2);

        assert_eq!(storage.delete_product("p1").unwrap().unwrap().name, "Blue Widget");
        assert!(storage.delete_product("p1").unwrap().is_none());
    }

    #[test]
    fn dashboard_orders_and_truncates() {
        let storage = Storage::temporary().unwrap();
        for i in 0..20 {
            storage
                .insert_product(&product(&format!("p{i}"), "Item", i))
                .unwrap();
        }
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..8 {
            storage
                .insert_sales_summary(&SalesSummary {
                    sales_summary_id: format!("s{i}"),
                    total_value: 100.0,
                    change_percentage: None,
                    date: base + Duration::days(i),
                })
                .unwrap();
        }

        let metrics = storage.dashboard_metrics().unwrap();
        assert_eq!(metrics.popular_products.len(), 15);
        assert_eq!(metrics.popular_products[0].stock_quantity, 19);
        assert_eq!(metrics.sales_summary.len(), 5);
        assert_eq!(metrics.sales_summary[0].sales_summary_id, "s7");
        assert!(metrics.expense_summary.is_empty());
    }

    #[test]
    fn expenses_newest_first() {
        let storage = Storage::temporary().unwrap();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        for (i, category) in ["Office", "Salaries", "Professional"].iter().enumerate() {
            storage
                .insert_expense_by_category(&ExpenseByCategorySummary {
                    expense_by_category_summary_id: format!("e{i}"),
                    category: category.to_string(),
                    amount: 100 * (i as i64 + 1),
                    date: base + Duration::days(i as i64),
                })
                .unwrap();
        }
        storage
            .insert_user(&User {
                user_id: "u1".into(),
                name: "Mei".into(),
                email: "mei@x.com".into(),
            })
            .unwrap();

        let expenses = storage.list_expenses_by_category().unwrap();
        let ids: Vec<_> = expenses
            .iter()
            .map(|e| e.expense_by_category_summary_id.as_str())
            .collect();
        assert_eq!(ids, ["e2", "e1", "e0"]);
        assert_eq!(storage.list_users().unwrap().len(), 1);
    }
}
