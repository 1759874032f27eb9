//! Fixtures shared by the engine tests.

use chrono::Utc;

use meatbox_core::{
    BoxStatus, DispatchSteps, MeatBox, OrderStatus, PaymentStatus, PaymentType, Purchase,
};

pub fn meat_box(id: &str, status: BoxStatus, total_kg: i64) -> MeatBox {
    let now = Utc::now();
    MeatBox {
        id: id.to_string(),
        name: "Costela Bovina".to_string(),
        brand: "Swift".to_string(),
        price_per_kg_cents: 4990,
        cost_per_kg_cents: 3500,
        total_kg,
        remaining_kg: total_kg,
        min_kg_per_person: 0,
        payment_type: PaymentType::Prepaid,
        status,
        deleted_at: None,
        created_at: now,
        updated_at: now,
        version: 0,
    }
}

pub fn purchase(id: &str, box_id: &str, kg: i64, status: OrderStatus, paid: bool) -> Purchase {
    let now = Utc::now();
    Purchase {
        id: id.to_string(),
        order_number: format!("GM{:0>8}", id.len()),
        box_id: box_id.to_string(),
        user_id: format!("buyer-{id}"),
        kg_purchased: kg,
        total_amount_cents: 4990 * kg,
        status,
        payment_status: if paid {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        },
        payment_link: None,
        payment_expires_at: None,
        dispatch: DispatchSteps::default(),
        created_at: now,
        updated_at: now,
        version: 0,
    }
}
