//! Static vendor and product catalog.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Vendor {
    pub id: u32,
    pub name: &'static str,
    pub category: &'static str,
    pub rating: f32,
    pub contact: &'static str,
    pub email: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Product {
    pub id: &'static str,
    pub name: &'static str,
    /// Rupees per ton
    pub price: u64,
    pub unit: &'static str,
    pub description: &'static str,
}

/// Unit recorded on cart lines and orders.
pub const ORDER_UNIT: &str = "tons";

static VENDORS: [Vendor; 3] = [
    Vendor {
        id: 1,
        name: "Steel Supply Co.",
        category: "Raw Materials",
        rating: 4.8,
        contact: "+91 (891) 123-4567",
        email: "contact@steelsupply.com",
        status: "Active",
    },
    Vendor {
        id: 2,
        name: "Industrial Equipment Ltd.",
        category: "Machinery",
        rating: 4.6,
        contact: "+91 (891) 987-6543",
        email: "sales@indequip.com",
        status: "Active",
    },
    Vendor {
        id: 3,
        name: "Quality Tools Inc.",
        category: "Tools & Equipment",
        rating: 4.9,
        contact: "+91 (891) 456-7890",
        email: "info@qualitytools.com",
        status: "Active",
    },
];

static PRODUCTS: [Product; 6] = [
    Product {
        id: "1",
        name: "Hot Rolled Coils",
        price: 45000,
        unit: "per ton",
        description: "High-quality hot rolled steel coils for construction",
    },
    Product {
        id: "2",
        name: "Cold Rolled Sheets",
        price: 52000,
        unit: "per ton",
        description: "Precision cold rolled steel sheets for automotive",
    },
    Product {
        id: "3",
        name: "Wire Rods",
        price: 48000,
        unit: "per ton",
        description: "Steel wire rods for manufacturing applications",
    },
    Product {
        id: "4",
        name: "Structural Steel",
        price: 50000,
        unit: "per ton",
        description: "Beams, angles, and channels for construction",
    },
    Product {
        id: "5",
        name: "Steel Plates",
        price: 47000,
        unit: "per ton",
        description: "Heavy steel plates for industrial use",
    },
    Product {
        id: "6",
        name: "Steel Pipes",
        price: 55000,
        unit: "per ton",
        description: "Seamless and welded steel pipes",
    },
];

pub fn vendors() -> &'static [Vendor] {
    &VENDORS
}

pub fn products() -> &'static [Product] {
    &PRODUCTS
}

pub fn find_product(id: &str) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.id == id)
}

#[cfg(feature = "web")]
pub async fn handle_vendors() -> axum::Json<&'static [Vendor]> {
    axum::Json(vendors())
}

#[cfg(feature = "web")]
pub async fn handle_products() -> axum::Json<&'static [Product]> {
    axum::Json(products())
}
