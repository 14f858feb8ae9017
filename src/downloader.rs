use crate::inventory::InventoryItem;

const HEADERS: [&str; 12] = [
    "Item ID",
    "Name",
    "Category",
    "Quantity",
    "Unit",
    "Status",
    "Min Threshold",
    "Max Threshold",
    "Location",
    "Supplier",
    "Cost Per Unit",
    "Last Updated",
];

fn row(item: &InventoryItem) -> [String; 12] {
    [
        item.item_id.clone(),
        item.name.clone(),
        item.category.clone(),
        item.quantity.to_string(),
        item.unit.clone(),
        item.status.as_str().to_string(),
        item.min_threshold.to_string(),
        item.max_threshold.to_string(),
        item.location.clone().unwrap_or_default(),
        item.supplier.clone().unwrap_or_default(),
        item.cost_per_unit.map(|c| c.to_string()).unwrap_or_default(),
        item.updated_at
            .unwrap_or(item.created_at)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
    ]
}

/// Convert inventory rows to CSV format
///
/// The first line holds the column headers. Fields containing commas,
/// quotes or newlines are quoted, with embedded quotes doubled.
///
/// # Arguments
/// * `items` - Rows to export, in display order
///
/// # Returns
/// * `String` - CSV content
pub fn to_csv(items: &[InventoryItem]) -> String {
    let mut csv_content = HEADERS.join(",");
    csv_content.push('\n');

    for item in items {
        for (c, value) in row(item).iter().enumerate() {
            if c > 0 {
                csv_content.push(',');
            }
            csv_content.push_str(&escape_field(value));
        }
        csv_content.push('\n');
    }

    csv_content
}

fn escape_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Convert inventory rows to XLSX format
///
/// Writes a single "Inventory" worksheet with a bold header row. Numeric
/// columns are written as numbers so they can be summed in a spreadsheet.
///
/// # Arguments
/// * `items` - Rows to export, in display order
///
/// # Returns
/// * `Result<Vec<u8>, XlsxError>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(items: &[InventoryItem]) -> Result<Vec<u8>, rust_xlsxwriter::XlsxError> {
    use rust_xlsxwriter::{Format, Workbook};

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Inventory")?;

    let bold = Format::new().set_bold();
    for (c, title) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, *title, &bold)?;
    }

    for (r, item) in items.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, value) in row(item).iter().enumerate() {
            let c = c as u16;
            match c {
                3 => worksheet.write_number(r, c, item.quantity as f64)?,
                6 => worksheet.write_number(r, c, item.min_threshold as f64)?,
                7 => worksheet.write_number(r, c, item.max_threshold as f64)?,
                10 if item.cost_per_unit.is_some() => {
                    worksheet.write_number(r, c, item.cost_per_unit.unwrap_or_default())?
                }
                _ => worksheet.write_string(r, c, value)?,
            };
        }
    }

    workbook.save_to_buffer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventoryStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn item(name: &str) -> InventoryItem {
        InventoryItem {
            id: Uuid::new_v4(),
            item_id: "RM-001".to_string(),
            name: name.to_string(),
            category: "Raw Materials".to_string(),
            quantity: 1500,
            unit: "tons".to_string(),
            status: InventoryStatus::LowStock,
            min_threshold: 100,
            max_threshold: 10_000,
            location: Some("Yard 3".to_string()),
            supplier: None,
            cost_per_unit: Some(4200.5),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn header_and_rows() {
        let csv = to_csv(&[item("Iron Ore")]);
        let mut lines = csv.lines();

        assert!(lines.next().unwrap().starts_with("Item ID,Name,Category,Quantity"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("RM-001,Iron Ore,Raw Materials,1500,tons,Low Stock,100,10000,Yard 3,,4200.5,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn quotes_special_characters() {
        let csv = to_csv(&[item("Coke, \"met\" grade")]);
        assert!(csv.contains("\"Coke, \"\"met\"\" grade\""));
    }
}
