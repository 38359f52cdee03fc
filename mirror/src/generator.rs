//! Synthetic customer records used to produce load on a source.

use chrono::Utc;
use rand::Rng;
use rand::seq::SliceRandom;
use std::ops::RangeInclusive;

use crate::types::{Address, Record, RecordId, RecordIdGenerator};

const FIRST_NAMES: &[&str] = &[
    "Olivia", "Liam", "Emma", "Noah", "Ava", "Elijah", "Sophia", "James", "Isabella", "Lucas",
    "Mia", "Mateo", "Amelia", "Ethan", "Harper", "Kenji", "Aisha", "Lars", "Priya", "Tomás",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Wilson", "Anderson", "Tanaka", "Okafor", "Nguyen",
];

const STREET_NAMES: &[&str] = &[
    "Main Street", "Oak Avenue", "Maple Drive", "Cedar Lane", "Market Street", "Elm Court",
    "Sunset Boulevard", "Lakeview Road", "Highland Way", "Park Place",
];

const SECONDARY_UNITS: &[&str] = &["Apt.", "Suite", "Unit", "Floor"];

const EMAIL_PROVIDERS: &[&str] = &["example.com", "example.org", "example.net", "mail.example.com"];

/// City, state and country triples, kept together so generated addresses stay coherent.
const LOCATIONS: &[(&str, &str, &str)] = &[
    ("San Francisco", "CA", "US"),
    ("Austin", "TX", "US"),
    ("Portland", "OR", "US"),
    ("Toronto", "ON", "CA"),
    ("Vancouver", "BC", "CA"),
    ("Manchester", "ENG", "GB"),
    ("Sydney", "NSW", "AU"),
    ("Munich", "BY", "DE"),
];

/// Generates realistic-shaped customer records with increasing identities.
#[derive(Debug, Default)]
pub struct CustomerGenerator {
    ids: RecordIdGenerator,
}

impl CustomerGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator whose records all get identities greater than `last`.
    pub fn starting_after(last: RecordId) -> Self {
        Self {
            ids: RecordIdGenerator::starting_after(last),
        }
    }

    /// Generates one customer created now.
    pub fn customer(&self) -> Record {
        let mut rng = rand::thread_rng();
        let created_at = Utc::now();

        let first_name = pick(&mut rng, FIRST_NAMES);
        let last_name = pick(&mut rng, LAST_NAMES);
        let (city, state, country) = *LOCATIONS.choose(&mut rng).unwrap_or(&LOCATIONS[0]);

        Record {
            id: self.ids.next_id(created_at),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: format!(
                "{}.{}{}@{}",
                first_name.to_lowercase(),
                last_name.to_lowercase(),
                rng.gen_range(1..1000),
                pick(&mut rng, EMAIL_PROVIDERS)
            ),
            address: Address {
                line1: format!("{} {}", rng.gen_range(1..9999), pick(&mut rng, STREET_NAMES)),
                line2: format!(
                    "{} {}",
                    pick(&mut rng, SECONDARY_UNITS),
                    rng.gen_range(1..500)
                ),
                postcode: format!("{:05}", rng.gen_range(501..99951)),
                city: city.to_string(),
                state: state.to_string(),
                country: country.to_string(),
            },
            created_at,
        }
    }

    /// Generates `count` customers in creation order.
    pub fn generate(&self, count: usize) -> Vec<Record> {
        (0..count).map(|_| self.customer()).collect()
    }

    /// Generates a batch whose size is drawn uniformly from `size`.
    pub fn generate_batch(&self, size: RangeInclusive<usize>) -> Vec<Record> {
        let count = rand::thread_rng().gen_range(size);
        self.generate(count)
    }
}

fn pick<'a, R: Rng>(rng: &mut R, values: &[&'a str]) -> &'a str {
    values.choose(rng).copied().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_customers_are_ordered_and_well_formed() {
        let customers = CustomerGenerator::new().generate(100);

        for pair in customers.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        for customer in &customers {
            assert!(customer.email.contains('@'));
            assert_eq!(customer.address.postcode.len(), 5);
        }
    }

    #[test]
    fn batch_size_stays_within_range() {
        let generator = CustomerGenerator::new();

        for _ in 0..50 {
            let batch = generator.generate_batch(1..=10);
            assert!((1..=10).contains(&batch.len()));
        }
    }
}
