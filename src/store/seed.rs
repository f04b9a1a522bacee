//! 建表与示例数据（客户、商品、订单、订单明细）；重复执行不会重复写入

use std::path::Path;

use rusqlite::{params, Connection};

use crate::store::StoreError;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL,
    phone TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    price REAL NOT NULL,
    stock_quantity INTEGER DEFAULT 0,
    category TEXT
);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL,
    status TEXT DEFAULT 'pending',
    total_amount REAL NOT NULL,
    shipping_address TEXT,
    tracking_number TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (customer_id) REFERENCES customers(id)
);

CREATE TABLE IF NOT EXISTS order_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    quantity INTEGER NOT NULL,
    unit_price REAL NOT NULL,
    FOREIGN KEY (order_id) REFERENCES orders(id),
    FOREIGN KEY (product_id) REFERENCES products(id)
);
";

const CUSTOMERS: &[(&str, &str, &str)] = &[
    ("Alice Johnson", "alice@example.com", "555-0101"),
    ("Bob Smith", "bob@example.com", "555-0102"),
    ("Carol White", "carol@example.com", "555-0103"),
    ("David Brown", "david@example.com", "555-0104"),
    ("Eva Martinez", "eva@example.com", "555-0105"),
];

const PRODUCTS: &[(&str, &str, f64, i64, &str)] = &[
    ("Wireless Headphones", "Premium noise-canceling headphones", 149.99, 50, "Electronics"),
    ("USB-C Hub", "7-in-1 USB-C adapter", 49.99, 120, "Electronics"),
    ("Mechanical Keyboard", "RGB mechanical keyboard with Cherry MX switches", 129.99, 35, "Electronics"),
    ("Laptop Stand", "Adjustable aluminum laptop stand", 39.99, 80, "Accessories"),
    ("Webcam HD", "1080p webcam with microphone", 79.99, 45, "Electronics"),
    ("Mouse Pad XL", "Extended gaming mouse pad", 24.99, 200, "Accessories"),
    ("Monitor Light", "LED monitor light bar", 59.99, 60, "Accessories"),
    ("Cable Organizer", "Desktop cable management kit", 19.99, 150, "Accessories"),
];

const ORDERS: &[(i64, &str, f64, &str, Option<&str>)] = &[
    (1, "delivered", 199.98, "123 Main St, City A", Some("TRK001234")),
    (1, "shipped", 129.99, "123 Main St, City A", Some("TRK001235")),
    (2, "processing", 49.99, "456 Oak Ave, City B", None),
    (3, "pending", 169.98, "789 Pine Rd, City C", None),
    (4, "delivered", 79.99, "321 Elm St, City D", Some("TRK001236")),
    (5, "cancelled", 149.99, "654 Maple Dr, City E", None),
];

/// (order_id, product_id, quantity, unit_price)
const ORDER_ITEMS: &[(i64, i64, i64, f64)] = &[
    (1, 1, 1, 149.99),
    (1, 2, 1, 49.99),
    (2, 3, 1, 129.99),
    (3, 2, 1, 49.99),
    (4, 1, 1, 149.99),
    (4, 8, 1, 19.99),
    (5, 5, 1, 79.99),
    (6, 1, 1, 149.99),
];

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)
        .map_err(|e| StoreError::Init(e.to_string()))
}

/// 写入示例数据；customers 非空时跳过
pub fn seed_sample_data(conn: &mut Connection) -> Result<bool, StoreError> {
    let init = |e: rusqlite::Error| StoreError::Init(e.to_string());

    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM customers", [], |r| r.get(0))
        .map_err(init)?;
    if existing > 0 {
        return Ok(false);
    }

    let tx = conn.transaction().map_err(init)?;
    {
        let mut stmt = tx
            .prepare("INSERT INTO customers (name, email, phone) VALUES (?1, ?2, ?3)")
            .map_err(init)?;
        for (name, email, phone) in CUSTOMERS {
            stmt.execute(params![name, email, phone]).map_err(init)?;
        }

        let mut stmt = tx
            .prepare(
                "INSERT INTO products (name, description, price, stock_quantity, category) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(init)?;
        for (name, desc, price, stock, category) in PRODUCTS {
            stmt.execute(params![name, desc, price, stock, category])
                .map_err(init)?;
        }

        let mut stmt = tx
            .prepare(
                "INSERT INTO orders (customer_id, status, total_amount, shipping_address, tracking_number) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(init)?;
        for (customer, status, total, address, tracking) in ORDERS {
            stmt.execute(params![customer, status, total, address, tracking])
                .map_err(init)?;
        }

        let mut stmt = tx
            .prepare(
                "INSERT INTO order_items (order_id, product_id, quantity, unit_price) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(init)?;
        for (order, product, qty, price) in ORDER_ITEMS {
            stmt.execute(params![order, product, qty, price]).map_err(init)?;
        }
    }
    tx.commit().map_err(init)?;
    Ok(true)
}

/// 打开（必要时创建）数据库文件，建表并写入示例数据
pub fn init_database(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Init(format!("create {}: {}", parent.display(), e)))?;
    }
    let mut conn = Connection::open(path).map_err(|e| StoreError::Init(e.to_string()))?;
    init_schema(&conn)?;
    if seed_sample_data(&mut conn)? {
        tracing::info!(path = %path.display(), "seeded sample data");
    }
    Ok(())
}
