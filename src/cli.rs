use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// run the content gateway HTTP server
#[argh(subcommand, name = "serve")]
pub(crate) struct GatewayServe {}

#[derive(FromArgs, PartialEq, Debug)]
/// run pending database migrations and exit
#[argh(subcommand, name = "migrate")]
pub(crate) struct GatewayMigrate {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub(crate) enum GatewayCommand {
    Serve(GatewayServe),
    Migrate(GatewayMigrate),
}

#[derive(FromArgs, PartialEq, Debug)]
/// content gateway: resolves distributions and serves repository content over HTTP
pub(crate) struct Gateway {
    /// specify the location of the config file
    #[argh(option, short = 'c', default = "String::from(\"config.toml\")")]
    pub config: String,
    #[argh(subcommand)]
    pub command: GatewayCommand,
}
