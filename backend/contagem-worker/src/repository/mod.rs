mod postgres_repository;
mod r#trait;

pub use postgres_repository::PostgresContagemRepository;
pub use r#trait::ContagemRepository;

#[cfg(test)]
pub use r#trait::MockContagemRepository;
