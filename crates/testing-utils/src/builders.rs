//! Test data builders for creating test entities

use chrono::Utc;
use lastmile_domain::{
    Courier, CourierStatus, Delivery, DeliveryStatus, NewDelivery, VehicleType,
};

/// Builder for creating test Delivery entities
pub struct DeliveryBuilder {
    delivery: Delivery,
}

impl DeliveryBuilder {
    pub fn new() -> Self {
        Self {
            delivery: NewDelivery {
                id: "PKG001".to_string(),
                sender_name: "Ko Aung".to_string(),
                sender_phone: "09111222333".to_string(),
                sender_address: "Yangon Kamayut Township".to_string(),
                receiver_name: "Ma Hla".to_string(),
                receiver_phone: "09444555666".to_string(),
                receiver_address: "Yangon Bahan Township No.12".to_string(),
                weight_kg: 1.0,
            }
            .into_delivery(Utc::now()),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.delivery.id = id.to_string();
        self
    }

    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.delivery.status = status;
        self
    }

    pub fn with_courier(mut self, courier_id: &str) -> Self {
        self.delivery.courier_id = Some(courier_id.to_string());
        self
    }

    pub fn with_receiver_address(mut self, address: &str) -> Self {
        self.delivery.receiver_address = address.to_string();
        self
    }

    pub fn with_weight(mut self, weight_kg: f64) -> Self {
        self.delivery.weight_kg = weight_kg;
        self
    }

    pub fn with_transfer_code(mut self, code: &str) -> Self {
        self.delivery.transfer_code = Some(code.to_string());
        self
    }

    pub fn build(self) -> Delivery {
        self.delivery
    }

    pub fn build_new(self) -> NewDelivery {
        let d = self.delivery;
        NewDelivery {
            id: d.id,
            sender_name: d.sender_name,
            sender_phone: d.sender_phone,
            sender_address: d.sender_address,
            receiver_name: d.receiver_name,
            receiver_phone: d.receiver_phone,
            receiver_address: d.receiver_address,
            weight_kg: d.weight_kg,
        }
    }
}

impl Default for DeliveryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Courier entities
pub struct CourierBuilder {
    courier: Courier,
}

impl CourierBuilder {
    pub fn new() -> Self {
        Self {
            courier: Courier {
                id: "COU001".to_string(),
                name: "test_courier".to_string(),
                phone: "09000000000".to_string(),
                status: CourierStatus::Active,
                vehicle_type: VehicleType::Motorcycle,
                rating: Some(5.0),
                total_deliveries: 0,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.courier.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.courier.name = name.to_string();
        self
    }

    pub fn with_status(mut self, status: CourierStatus) -> Self {
        self.courier.status = status;
        self
    }

    pub fn with_vehicle(mut self, vehicle_type: VehicleType) -> Self {
        self.courier.vehicle_type = vehicle_type;
        self
    }

    pub fn with_rating(mut self, rating: Option<f64>) -> Self {
        self.courier.rating = rating;
        self
    }

    pub fn with_total_deliveries(mut self, total_deliveries: u32) -> Self {
        self.courier.total_deliveries = total_deliveries;
        self
    }

    pub fn active(self) -> Self {
        self.with_status(CourierStatus::Active)
    }

    pub fn busy(self) -> Self {
        self.with_status(CourierStatus::Busy)
    }

    pub fn inactive(self) -> Self {
        self.with_status(CourierStatus::Inactive)
    }

    pub fn build(self) -> Courier {
        self.courier
    }
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self::new()
    }
}
