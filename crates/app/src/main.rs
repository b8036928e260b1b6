use std::time::Duration;

use chrono::NaiveDate;
use labtrack_app::{AppError, AppServices, NewStockItem};
use labtrack_booking::TimeRange;
use labtrack_core::{LabId, UserId};
use labtrack_inventory::ItemKind;

/// Runs a small end-to-end scenario against in-memory infrastructure:
/// equipment registration, a contested reservation, and stock movements.
fn main() -> anyhow::Result<()> {
    labtrack_observability::init();

    let services = AppServices::in_memory();
    let lab_id = LabId::new();
    let technician = UserId::new();
    let supervisor = UserId::new();
    let date = NaiveDate::from_ymd_opt(2025, 6, 12).ok_or_else(|| anyhow::anyhow!("bad date"))?;

    let equipment_id = services.register_equipment(
        lab_id,
        "Thermocycler A",
        "pcr",
        Some("TC-96".to_string()),
        None,
    )?;
    let item_id = services.register_item(
        lab_id,
        NewStockItem {
            kind: ItemKind::Lab,
            name: "master mix".to_string(),
            unit: "tube".to_string(),
            catalog_number: Some("MM-201".to_string()),
            reorder_point: Some(5),
            initial_stock: 20,
        },
        technician,
    )?;

    // Give the worker a beat to apply the registrations.
    std::thread::sleep(Duration::from_millis(100));

    let morning = TimeRange::new(540, 600)?;
    let booking_id =
        services.reserve_equipment(lab_id, equipment_id, date, morning, technician, None)?;

    // A second request overlapping the same slot must lose deterministically.
    let overlapping = TimeRange::new(570, 630)?;
    match services.reserve_equipment(lab_id, equipment_id, date, overlapping, supervisor, None) {
        Err(AppError::SlotTaken {
            conflicting_booking,
        }) => {
            tracing::info!(%conflicting_booking, "overlapping request refused as expected");
        }
        Ok(other) => anyhow::bail!("overlapping request was accepted as {other}"),
        Err(other) => return Err(other.into()),
    }

    services.approve_booking(lab_id, equipment_id, date, booking_id, supervisor)?;

    let remaining = services.consume_stock(lab_id, item_id, 8, Some("run prep".to_string()), technician)?;
    tracing::info!(remaining, "consumed 8 tubes");

    let adjustment = services.adjust_stock(lab_id, item_id, 10, Some("cycle count".to_string()), supervisor)?;
    tracing::info!(
        previous = adjustment.previous,
        new_quantity = adjustment.new_quantity,
        delta = adjustment.delta,
        "stock adjusted"
    );

    std::thread::sleep(Duration::from_millis(100));
    for entry in services.logbook_entries(lab_id) {
        tracing::info!(at = %entry.logged_at, "{}", entry.summary);
    }

    services.shutdown();
    Ok(())
}
