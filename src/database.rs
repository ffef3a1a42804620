use clap::ValueEnum;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Database {
    /// Spongebase adapter over the bundled in-process cluster
    Spongebase,
}
