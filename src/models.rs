use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dashboard operator account. Subscription state is driven by billing webhooks.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
    pub admin_user_id: String,
    pub name: String,
    pub email: String,
    pub password: String, // bcrypt hash
    #[serde(default)]
    pub has_access: bool,
    #[serde(default)]
    pub price_id: Option<String>,
}

/// `GET /admin/me` view of an admin: no password hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentAdmin {
    pub admin_user_id: String,
    pub name: String,
    pub email: String,
    pub has_access: bool,
    pub price_id: Option<String>,
}

impl From<AdminUser> for CurrentAdmin {
    fn from(admin: AdminUser) -> Self {
        Self {
            admin_user_id: admin.admin_user_id,
            name: admin.name,
            email: admin.email,
            has_access: admin.has_access,
            price_id: admin.price_id,
        }
    }
}

/// `PATCH /admin/update` view of an admin.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminProfile {
    pub admin_user_id: String,
    pub name: String,
    pub email: String,
}

impl From<AdminUser> for AdminProfile {
    fn from(admin: AdminUser) -> Self {
        Self {
            admin_user_id: admin.admin_user_id,
            name: admin.name,
            email: admin.email,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: String,
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    pub stock_quantity: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub sales_summary_id: String,
    pub total_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percentage: Option<f64>,
    pub date: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSummary {
    pub purchase_summary_id: String,
    pub total_purchased: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percentage: Option<f64>,
    pub date: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseSummary {
    pub expense_summary_id: String,
    pub total_expenses: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percentage: Option<f64>,
    pub date: DateTime<Utc>,
}

/// Amounts are integral minor units; the dashboard expects them as strings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseByCategorySummary {
    pub expense_by_category_summary_id: String,
    pub category: String,
    #[serde(with = "amount_string")]
    pub amount: i64,
    pub date: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub popular_products: Vec<Product>,
    pub sales_summary: Vec<SalesSummary>,
    pub purchase_summary: Vec<PurchaseSummary>,
    pub expense_summary: Vec<ExpenseSummary>,
    pub expense_by_category_summary: Vec<ExpenseByCategorySummary>,
}

/// JWT payload shared by access and refresh tokens.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

/// Authenticated caller, attached to the request by the session middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

mod amount_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn admin_wire_names_are_camel_case() {
        let admin = AdminUser {
            admin_user_id: "a1".into(),
            name: "A".into(),
            email: "a@x.com".into(),
            password: "hash".into(),
            has_access: false,
            price_id: None,
        };
        let value = serde_json::to_value(CurrentAdmin::from(admin)).unwrap();
        assert_eq!(
            value,
            json!({
                "adminUserId": "a1",
                "name": "A",
                "email": "a@x.com",
                "hasAccess": false,
                "priceId": null
            })
        );
    }

    #[test]
    fn expense_amount_is_a_string_on_the_wire() {
        let row: ExpenseByCategorySummary = serde_json::from_value(json!({
            "expenseByCategorySummaryId": "e1",
            "category": "Office",
            "amount": 1250,
            "date": "2026-01-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(row.amount, 1250);
        assert_eq!(serde_json::to_value(&row).unwrap()["amount"], json!("1250"));
    }
}
