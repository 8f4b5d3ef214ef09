//! assignment.rs
//!
//! Транзакционный workflow назначения мест экипажу.
//!
//! Одна транзакция, два исхода по количеству существующих назначений
//! на пару (рейс, дата):
//! 1.  **Создание**: назначения нет - генерируем 3 места, пишем шапку
//!     и места одним коммитом.
//! 2.  **Частичная замена**: назначение есть - меняем только запрошенное
//!     подмножество мест, остальные не трогаем.
//!
//! Откат на любом ошибочном пути структурный: транзакция - это значение,
//! и ранний `return` дропает ее без commit, что для хранилища значит rollback.

use thiserror::Error;
use tracing::{debug, error, info};

use crate::models::{extract_seats, AircraftType, FlightAssignment};
use crate::repository::{FlightFilter, FlightStore, NewAssignment, StoreError};
use crate::services::allocator::{AllocationError, SeatAllocator};

/// Сколько мест выдается при создании назначения. Не параметр запроса.
pub const SEATS_PER_ASSIGNMENT: usize = 3;

#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("failed to generate seats: {0}")]
    SeatGeneration(#[from] AllocationError),
    #[error("assignment for this flight and date already exists and no seats to change")]
    AlreadyExists,
    #[error("no matching assignment found for the requested seats")]
    NoMatchingAssignment,
    #[error("failed to create assignment in DB: {0}")]
    CreateAssignment(#[source] StoreError),
    #[error("failed to create seat assignments: {0}")]
    CreateSeats(#[source] StoreError),
    #[error("failed to delete seats: {0}")]
    DeleteSeats(#[source] StoreError),
    #[error("failed to re-create seat assignments: {0}")]
    RecreateSeats(#[source] StoreError),
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] StoreError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Запрос на выдачу/замену мест, уже прошедший валидацию на границе.
#[derive(Debug, Clone)]
pub struct GenerateSeatsRequest {
    pub crew_name: String,
    pub crew_id: String,
    pub flight_number: String,
    pub date: String, // DD-MM-YY
    pub aircraft: AircraftType,
    pub seats_to_change: Vec<String>,
}

pub struct AssignmentService<S, G> {
    store: S,
    seat_gen: G,
}

impl<S: FlightStore, G: SeatAllocator> AssignmentService<S, G> {
    pub fn new(store: S, seat_gen: G) -> Self {
        Self { store, seat_gen }
    }

    /// Пробник существования: без транзакции и без побочных эффектов.
    pub async fn check_flight_exists(
        &self,
        flight_number: &str,
        date: &str,
    ) -> Result<bool, StoreError> {
        let count = self
            .store
            .count_by_flight_and_date(flight_number, date)
            .await?;
        Ok(count > 0)
    }

    pub async fn generate_and_assign(
        &self,
        request: &GenerateSeatsRequest,
    ) -> Result<FlightAssignment, AssignmentError> {
        let mut tx = self.store.begin().await?;

        // Считаем внутри транзакции, а не через пробник: нужен счет,
        // согласованный с конкурентными писателями
        let count = self
            .store
            .count_by_flight_and_date_tx(&mut tx, &request.flight_number, &request.date)
            .await?;

        if count == 0 {
            self.create_assignment(&mut tx, request).await?;
        } else {
            self.replace_seats(&mut tx, request).await?;
        }

        self.store.commit(tx).await.map_err(AssignmentError::Commit)?;

        // Пере-чтение вне транзакции: свежезакоммиченная строка обязана быть
        // видимой (read-committed или строже)
        let current = FlightFilter {
            flight_number: request.flight_number.clone(),
            date: request.date.clone(),
            seats: Vec::new(),
        };
        let assignments = self.store.get_by_filter(&current).await?;
        assignments
            .into_iter()
            .next()
            .ok_or(AssignmentError::NoMatchingAssignment)
    }

    // Ветка А: назначения еще нет
    async fn create_assignment(
        &self,
        tx: &mut S::Tx,
        request: &GenerateSeatsRequest,
    ) -> Result<(), AssignmentError> {
        let seats = self
            .seat_gen
            .generate_seats(request.aircraft, SEATS_PER_ASSIGNMENT, &[])
            .map_err(|e| {
                error!("Seat generation failed for {}: {}", request.aircraft, e);
                AssignmentError::SeatGeneration(e)
            })?;

        let new = NewAssignment {
            crew_name: request.crew_name.clone(),
            crew_id: request.crew_id.clone(),
            flight_number: request.flight_number.clone(),
            flight_date: request.date.clone(),
            aircraft_type: request.aircraft,
        };

        let assignment_id = self
            .store
            .create_assignment_tx(tx, &new)
            .await
            .map_err(|e| match e {
                // Параллельный создатель успел первым: для вызывающего
                // это тот же конфликт "уже существует"
                StoreError::UniqueViolation => AssignmentError::AlreadyExists,
                other => {
                    error!(
                        "Failed to persist assignment for {}: {}",
                        request.flight_number, other
                    );
                    AssignmentError::CreateAssignment(other)
                }
            })?;

        self.store
            .bulk_create_seats_tx(tx, assignment_id, &seats)
            .await
            .map_err(|e| {
                error!(
                    "Failed to create seat assignments for {}: {}",
                    request.flight_number, e
                );
                AssignmentError::CreateSeats(e)
            })?;

        Ok(())
    }

    // Ветка Б: назначение есть, меняем подмножество мест
    async fn replace_seats(
        &self,
        tx: &mut S::Tx,
        request: &GenerateSeatsRequest,
    ) -> Result<(), AssignmentError> {
        if request.seats_to_change.is_empty() {
            info!(
                "Flight assignment already exists: {} on {}",
                request.flight_number, request.date
            );
            return Err(AssignmentError::AlreadyExists);
        }

        let filter = FlightFilter {
            flight_number: request.flight_number.clone(),
            date: request.date.clone(),
            seats: request.seats_to_change.clone(),
        };

        let assignments = match self.store.get_by_filter_tx(tx, &filter).await {
            Ok(found) if !found.is_empty() => found,
            Ok(_) => return Err(AssignmentError::NoMatchingAssignment),
            Err(e) => {
                error!("Failed to look up assignment for seat change: {}", e);
                return Err(AssignmentError::NoMatchingAssignment);
            }
        };
        let existing = &assignments[0];

        // Исключаем все места, которые рейс держит сейчас: замена не должна
        // столкнуться ни с оставляемыми, ни с заменяемыми местами
        let held_seats = extract_seats(&existing.seat_assignments);
        let seats = self
            .seat_gen
            .generate_seats(request.aircraft, request.seats_to_change.len(), &held_seats)
            .map_err(|e| {
                error!("Seat generation failed for {}: {}", request.aircraft, e);
                AssignmentError::SeatGeneration(e)
            })?;

        let deleted = self
            .store
            .delete_seats_by_filter_tx(tx, &filter)
            .await
            .map_err(|e| {
                error!("Failed to delete existing seats: {}", e);
                AssignmentError::DeleteSeats(e)
            })?;
        debug!(
            "Deleted {} seat rows for {} on {}",
            deleted, request.flight_number, request.date
        );

        self.store
            .bulk_create_seats_tx(tx, existing.id, &seats)
            .await
            .map_err(|e| {
                error!("Failed to re-create seats: {}", e);
                AssignmentError::RecreateSeats(e)
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlightSeatAssignment;
    use chrono::NaiveDateTime;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /* ---------- тестовые двойники ---------- */

    struct StubAllocator {
        result: Result<Vec<String>, AllocationError>,
        calls: Mutex<Vec<(AircraftType, usize, Vec<String>)>>,
    }

    impl StubAllocator {
        fn returning(seats: &[&str]) -> Self {
            Self {
                result: Ok(seats.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(err: AllocationError) -> Self {
            Self {
                result: Err(err),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl SeatAllocator for StubAllocator {
        fn generate_seats(
            &self,
            aircraft: AircraftType,
            count: usize,
            excluded: &[String],
        ) -> Result<Vec<String>, AllocationError> {
            self.calls
                .lock()
                .unwrap()
                .push((aircraft, count, excluded.to_vec()));
            self.result.clone()
        }
    }

    #[derive(Debug, Clone, Default)]
    struct MemState {
        assignments: Vec<FlightAssignment>,
        next_assignment_id: i64,
        next_seat_id: i64,
    }

    /// In-memory хранилище с настоящей семантикой транзакций: `Tx` - рабочая
    /// копия состояния, commit публикует ее, drop без commit ничего не меняет.
    #[derive(Default)]
    struct MemStore {
        state: Mutex<MemState>,
        fail_commit: bool,
        force_unique_violation: bool,
    }

    impl MemStore {
        fn with_assignment(flight_number: &str, date: &str, seats: &[&str]) -> Self {
            let store = MemStore::default();
            {
                let mut state = store.state.lock().unwrap();
                let seat_assignments = seats
                    .iter()
                    .enumerate()
                    .map(|(i, s)| FlightSeatAssignment {
                        id: i as i64 + 1,
                        flight_assignment_id: 1,
                        seat: s.to_string(),
                        created_at: NaiveDateTime::default(),
                    })
                    .collect();
                state.assignments.push(FlightAssignment {
                    id: 1,
                    crew_name: "ApArki".to_string(),
                    crew_id: "98123".to_string(),
                    flight_number: flight_number.to_string(),
                    flight_date: date.to_string(),
                    aircraft_type: AircraftType::Airbus320,
                    seat_assignments,
                    created_at: NaiveDateTime::default(),
                });
                state.next_assignment_id = 1;
                state.next_seat_id = seats.len() as i64;
            }
            store
        }

        fn seats_of(&self, flight_number: &str, date: &str) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state
                .assignments
                .iter()
                .find(|a| a.flight_number == flight_number && a.flight_date == date)
                .map(|a| extract_seats(&a.seat_assignments))
                .unwrap_or_default()
        }
    }

    fn matches_filter(a: &FlightAssignment, filter: &FlightFilter) -> bool {
        a.flight_number == filter.flight_number
            && a.flight_date == filter.date
            && (filter.seats.is_empty()
                || a.seat_assignments
                    .iter()
                    .any(|s| filter.seats.contains(&s.seat)))
    }

    impl FlightStore for MemStore {
        type Tx = MemState;

        async fn begin(&self) -> Result<Self::Tx, StoreError> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
            if self.fail_commit {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            *self.state.lock().unwrap() = tx;
            Ok(())
        }

        async fn count_by_flight_and_date(
            &self,
            flight_number: &str,
            date: &str,
        ) -> Result<i64, StoreError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .assignments
                .iter()
                .filter(|a| a.flight_number == flight_number && a.flight_date == date)
                .count() as i64)
        }

        async fn count_by_flight_and_date_tx(
            &self,
            tx: &mut Self::Tx,
            flight_number: &str,
            date: &str,
        ) -> Result<i64, StoreError> {
            Ok(tx
                .assignments
                .iter()
                .filter(|a| a.flight_number == flight_number && a.flight_date == date)
                .count() as i64)
        }

        async fn create_assignment_tx(
            &self,
            tx: &mut Self::Tx,
            new: &NewAssignment,
        ) -> Result<i64, StoreError> {
            let duplicate = tx.assignments.iter().any(|a| {
                a.flight_number == new.flight_number && a.flight_date == new.flight_date
            });
            if duplicate || self.force_unique_violation {
                return Err(StoreError::UniqueViolation);
            }
            tx.next_assignment_id += 1;
            let id = tx.next_assignment_id;
            tx.assignments.push(FlightAssignment {
                id,
                crew_name: new.crew_name.clone(),
                crew_id: new.crew_id.clone(),
                flight_number: new.flight_number.clone(),
                flight_date: new.flight_date.clone(),
                aircraft_type: new.aircraft_type,
                seat_assignments: Vec::new(),
                created_at: NaiveDateTime::default(),
            });
            Ok(id)
        }

        async fn bulk_create_seats_tx(
            &self,
            tx: &mut Self::Tx,
            assignment_id: i64,
            seats: &[String],
        ) -> Result<(), StoreError> {
            let assignment = tx
                .assignments
                .iter_mut()
                .find(|a| a.id == assignment_id)
                .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
            for seat in seats {
                if assignment.seat_assignments.iter().any(|s| &s.seat == seat) {
                    return Err(StoreError::UniqueViolation);
                }
                tx.next_seat_id += 1;
                assignment.seat_assignments.push(FlightSeatAssignment {
                    id: tx.next_seat_id,
                    flight_assignment_id: assignment_id,
                    seat: seat.clone(),
                    created_at: NaiveDateTime::default(),
                });
            }
            Ok(())
        }

        async fn get_by_filter(
            &self,
            filter: &FlightFilter,
        ) -> Result<Vec<FlightAssignment>, StoreError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .assignments
                .iter()
                .filter(|a| matches_filter(a, filter))
                .cloned()
                .collect())
        }

        async fn get_by_filter_tx(
            &self,
            tx: &mut Self::Tx,
            filter: &FlightFilter,
        ) -> Result<Vec<FlightAssignment>, StoreError> {
            Ok(tx
                .assignments
                .iter()
                .filter(|a| matches_filter(a, filter))
                .cloned()
                .collect())
        }

        async fn delete_seats_by_filter_tx(
            &self,
            tx: &mut Self::Tx,
            filter: &FlightFilter,
        ) -> Result<u64, StoreError> {
            let assignment = tx
                .assignments
                .iter_mut()
                .find(|a| {
                    a.flight_number == filter.flight_number && a.flight_date == filter.date
                })
                .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
            let before = assignment.seat_assignments.len();
            assignment
                .seat_assignments
                .retain(|s| !filter.seats.contains(&s.seat));
            Ok((before - assignment.seat_assignments.len()) as u64)
        }
    }

    /* ---------- сценарии ---------- */

    fn request(seats_to_change: &[&str]) -> GenerateSeatsRequest {
        GenerateSeatsRequest {
            crew_name: "ApArki".to_string(),
            crew_id: "98123".to_string(),
            flight_number: "JT692".to_string(),
            date: "26-07-25".to_string(),
            aircraft: AircraftType::Airbus320,
            seats_to_change: seats_to_change.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn creates_assignment_with_three_seats() {
        let service = AssignmentService::new(
            MemStore::default(),
            StubAllocator::returning(&["3B", "7C", "14D"]),
        );

        let assignment = service.generate_and_assign(&request(&[])).await.unwrap();

        assert_eq!(assignment.flight_number, "JT692");
        assert_eq!(
            extract_seats(&assignment.seat_assignments),
            vec!["3B", "7C", "14D"]
        );

        // Создание всегда идет с пустым списком исключений
        let calls = service.seat_gen.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (AircraftType::Airbus320, 3, Vec::new()));
    }

    #[tokio::test]
    async fn existence_check_round_trip() {
        let service = AssignmentService::new(
            MemStore::default(),
            StubAllocator::returning(&["3B", "7C", "14D"]),
        );

        assert!(!service.check_flight_exists("JT692", "26-07-25").await.unwrap());
        service.generate_and_assign(&request(&[])).await.unwrap();
        assert!(service.check_flight_exists("JT692", "26-07-25").await.unwrap());
        assert!(!service.check_flight_exists("JT692", "27-07-25").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = MemStore::with_assignment("JT692", "26-07-25", &["3B", "7C", "14D"]);
        let service =
            AssignmentService::new(store, StubAllocator::returning(&["1A", "2B", "3C"]));

        let err = service.generate_and_assign(&request(&[])).await.unwrap_err();
        assert!(matches!(err, AssignmentError::AlreadyExists));

        // Хранилище не тронуто
        assert_eq!(
            service.store.seats_of("JT692", "26-07-25"),
            vec!["3B", "7C", "14D"]
        );
    }

    #[tokio::test]
    async fn partial_replacement_preserves_untouched_seats() {
        let store = MemStore::with_assignment("JT692", "26-07-25", &["3B", "7C", "14D"]);
        let service = AssignmentService::new(store, StubAllocator::returning(&["12A"]));

        let assignment = service
            .generate_and_assign(&request(&["14D"]))
            .await
            .unwrap();

        let seats: HashSet<String> = extract_seats(&assignment.seat_assignments)
            .into_iter()
            .collect();
        assert_eq!(seats.len(), 3);
        assert!(seats.contains("3B"));
        assert!(seats.contains("7C"));
        assert!(seats.contains("12A"));
        assert!(!seats.contains("14D"));

        // Генератору передали количество заменяемых мест и все занятые места как исключения
        let calls = service.seat_gen.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (aircraft, count, excluded) = &calls[0];
        assert_eq!(*aircraft, AircraftType::Airbus320);
        assert_eq!(*count, 1);
        let excluded: HashSet<&str> = excluded.iter().map(|s| s.as_str()).collect();
        assert_eq!(excluded, HashSet::from(["3B", "7C", "14D"]));
    }

    #[tokio::test]
    async fn replacement_of_unknown_seats_is_rejected() {
        let store = MemStore::with_assignment("JT692", "26-07-25", &["3B", "7C", "14D"]);
        let service = AssignmentService::new(store, StubAllocator::returning(&["12A"]));

        let err = service
            .generate_and_assign(&request(&["99Z"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::NoMatchingAssignment));
        assert_eq!(
            service.store.seats_of("JT692", "26-07-25"),
            vec!["3B", "7C", "14D"]
        );
    }

    #[tokio::test]
    async fn allocation_failure_on_create_leaves_store_untouched() {
        let service = AssignmentService::new(
            MemStore::default(),
            StubAllocator::failing(AllocationError::NotEnoughSeats),
        );

        let err = service.generate_and_assign(&request(&[])).await.unwrap_err();
        assert!(matches!(err, AssignmentError::SeatGeneration(_)));
        assert!(!service.check_flight_exists("JT692", "26-07-25").await.unwrap());
    }

    #[tokio::test]
    async fn allocation_failure_on_replace_rolls_back() {
        let store = MemStore::with_assignment("JT692", "26-07-25", &["3B", "7C", "14D"]);
        let service = AssignmentService::new(
            store,
            StubAllocator::failing(AllocationError::NotEnoughSeats),
        );

        let err = service
            .generate_and_assign(&request(&["14D"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::SeatGeneration(_)));

        // Транзакция дропнута без commit: старые места на месте
        assert_eq!(
            service.store.seats_of("JT692", "26-07-25"),
            vec!["3B", "7C", "14D"]
        );
    }

    #[tokio::test]
    async fn concurrent_create_race_maps_to_conflict() {
        // Счет внутри транзакции дал 0, но к моменту вставки другой писатель
        // уже закоммитился - уникальный индекс превращает гонку в конфликт
        let store = MemStore {
            force_unique_violation: true,
            ..MemStore::default()
        };
        let service =
            AssignmentService::new(store, StubAllocator::returning(&["3B", "7C", "14D"]));

        let err = service.generate_and_assign(&request(&[])).await.unwrap_err();
        assert!(matches!(err, AssignmentError::AlreadyExists));
    }

    #[tokio::test]
    async fn commit_failure_is_surfaced_and_rolled_back() {
        let store = MemStore {
            fail_commit: true,
            ..MemStore::default()
        };
        let service =
            AssignmentService::new(store, StubAllocator::returning(&["3B", "7C", "14D"]));

        let err = service.generate_and_assign(&request(&[])).await.unwrap_err();
        assert!(matches!(err, AssignmentError::Commit(_)));
        assert!(!service.check_flight_exists("JT692", "26-07-25").await.unwrap());
    }
}
