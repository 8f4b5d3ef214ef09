use chrono::NaiveDateTime;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{AircraftType, FlightAssignment, FlightSeatAssignment};

#[derive(Debug, Error)]
pub enum StoreError {
    // Гонка двух создателей на одну пару (рейс, дата) упирается в уникальный индекс
    #[error("assignment for this flight and date already exists")]
    UniqueViolation,
    #[error("unknown aircraft type in storage: {0}")]
    InvalidAircraft(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Фильтр чтения назначений: рейс + дата, опционально подмножество мест.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightFilter {
    pub flight_number: String,
    pub date: String,
    pub seats: Vec<String>,
}

/// Скалярные поля нового назначения (id и created_at выдает база).
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub crew_name: String,
    pub crew_id: String,
    pub flight_number: String,
    pub flight_date: String,
    pub aircraft_type: AircraftType,
}

/// Хранилище назначений. Workflow зависит только от этого контракта,
/// поэтому Postgres можно подменить in-memory реализацией в тестах.
///
/// Транзакция - это значение `Tx`: пока оно живо, все `*_tx` операции
/// попадают в нее; `commit` публикует изменения, а drop без commit
/// откатывает их. Отдельного rollback в контракте нет намеренно -
/// откат на каждом ошибочном пути гарантируется структурно.
#[allow(async_fn_in_trait)]
pub trait FlightStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn count_by_flight_and_date(
        &self,
        flight_number: &str,
        date: &str,
    ) -> Result<i64, StoreError>;

    async fn count_by_flight_and_date_tx(
        &self,
        tx: &mut Self::Tx,
        flight_number: &str,
        date: &str,
    ) -> Result<i64, StoreError>;

    async fn create_assignment_tx(
        &self,
        tx: &mut Self::Tx,
        new: &NewAssignment,
    ) -> Result<i64, StoreError>;

    async fn bulk_create_seats_tx(
        &self,
        tx: &mut Self::Tx,
        assignment_id: i64,
        seats: &[String],
    ) -> Result<(), StoreError>;

    async fn get_by_filter(&self, filter: &FlightFilter)
        -> Result<Vec<FlightAssignment>, StoreError>;

    async fn get_by_filter_tx(
        &self,
        tx: &mut Self::Tx,
        filter: &FlightFilter,
    ) -> Result<Vec<FlightAssignment>, StoreError>;

    async fn delete_seats_by_filter_tx(
        &self,
        tx: &mut Self::Tx,
        filter: &FlightFilter,
    ) -> Result<u64, StoreError>;
}

/* ---------- Postgres реализация ---------- */

#[derive(Clone)]
pub struct FlightRepository {
    pool: PgPool,
}

// Строка join'а назначение -> место
type JoinedRow = (
    i64,           // fa.id
    String,        // crew_name
    String,        // crew_id
    String,        // flight_number
    String,        // flight_date
    String,        // aircraft_type
    NaiveDateTime, // fa.created_at
    i64,           // fsa.id
    String,        // seat
    NaiveDateTime, // fsa.created_at
);

impl FlightRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn filter_query(with_seats: bool) -> String {
        let mut q = String::from(
            r#"
            SELECT fa.id, fa.crew_name, fa.crew_id, fa.flight_number, fa.flight_date,
                   fa.aircraft_type, fa.created_at,
                   fsa.id, fsa.seat, fsa.created_at
            FROM flight_assignments fa
            JOIN flight_seat_assignments fsa ON fsa.flight_assignment_id = fa.id
            WHERE fa.flight_number = $1 AND fa.flight_date = $2
            "#,
        );
        if with_seats {
            // Назначение подходит, если хотя бы одно из его мест входит в фильтр;
            // места при этом грузим все, а не только отфильтрованные
            q.push_str(
                " AND EXISTS (SELECT 1 FROM flight_seat_assignments f2 \
                 WHERE f2.flight_assignment_id = fa.id AND f2.seat = ANY($3))",
            );
        }
        q.push_str(" ORDER BY fsa.created_at DESC, fsa.id DESC");
        q
    }

    async fn get_by_filter_on<'c, E>(
        &self,
        executor: E,
        filter: &FlightFilter,
    ) -> Result<Vec<FlightAssignment>, StoreError>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        let q = Self::filter_query(!filter.seats.is_empty());
        let mut dbq = sqlx::query_as::<_, JoinedRow>(&q)
            .bind(&filter.flight_number)
            .bind(&filter.date);
        if !filter.seats.is_empty() {
            dbq = dbq.bind(&filter.seats);
        }
        let rows = dbq.fetch_all(executor).await?;

        // Группируем строки join'а по назначению, как места приходят из ORDER BY
        let mut map: BTreeMap<i64, FlightAssignment> = BTreeMap::new();
        for (aid, crew_name, crew_id, flight_number, flight_date, aircraft, created_at, sid, seat, seat_created_at) in rows {
            let aircraft_type = AircraftType::parse(&aircraft)
                .ok_or_else(|| StoreError::InvalidAircraft(aircraft.clone()))?;
            let entry = map.entry(aid).or_insert_with(|| FlightAssignment {
                id: aid,
                crew_name,
                crew_id,
                flight_number,
                flight_date,
                aircraft_type,
                seat_assignments: Vec::new(),
                created_at,
            });
            entry.seat_assignments.push(FlightSeatAssignment {
                id: sid,
                flight_assignment_id: aid,
                seat,
                created_at: seat_created_at,
            });
        }

        Ok(map.into_values().collect())
    }
}

impl FlightStore for FlightRepository {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        Ok(tx.commit().await?)
    }

    async fn count_by_flight_and_date(
        &self,
        flight_number: &str,
        date: &str,
    ) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM flight_assignments WHERE flight_number = $1 AND flight_date = $2",
        )
        .bind(flight_number)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_by_flight_and_date_tx(
        &self,
        tx: &mut Self::Tx,
        flight_number: &str,
        date: &str,
    ) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM flight_assignments WHERE flight_number = $1 AND flight_date = $2",
        )
        .bind(flight_number)
        .bind(date)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    async fn create_assignment_tx(
        &self,
        tx: &mut Self::Tx,
        new: &NewAssignment,
    ) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO flight_assignments (crew_name, crew_id, flight_number, flight_date, aircraft_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&new.crew_name)
        .bind(&new.crew_id)
        .bind(&new.flight_number)
        .bind(&new.flight_date)
        .bind(new.aircraft_type.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => StoreError::UniqueViolation,
            _ => StoreError::Database(e),
        })?;
        Ok(id)
    }

    async fn bulk_create_seats_tx(
        &self,
        tx: &mut Self::Tx,
        assignment_id: i64,
        seats: &[String],
    ) -> Result<(), StoreError> {
        if seats.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO flight_seat_assignments (flight_assignment_id, seat)
            SELECT $1, s FROM UNNEST($2::text[]) AS s
            "#,
        )
        .bind(assignment_id)
        .bind(seats)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn get_by_filter(
        &self,
        filter: &FlightFilter,
    ) -> Result<Vec<FlightAssignment>, StoreError> {
        self.get_by_filter_on(&self.pool, filter).await
    }

    async fn get_by_filter_tx(
        &self,
        tx: &mut Self::Tx,
        filter: &FlightFilter,
    ) -> Result<Vec<FlightAssignment>, StoreError> {
        self.get_by_filter_on(&mut **tx, filter).await
    }

    async fn delete_seats_by_filter_tx(
        &self,
        tx: &mut Self::Tx,
        filter: &FlightFilter,
    ) -> Result<u64, StoreError> {
        // Как и при чтении: сначала находим само назначение, потом трогаем места
        let assignment_id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM flight_assignments WHERE flight_number = $1 AND flight_date = $2 LIMIT 1",
        )
        .bind(&filter.flight_number)
        .bind(&filter.date)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;

        let result = sqlx::query(
            "DELETE FROM flight_seat_assignments WHERE flight_assignment_id = $1 AND seat = ANY($2)",
        )
        .bind(assignment_id)
        .bind(&filter.seats)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}
