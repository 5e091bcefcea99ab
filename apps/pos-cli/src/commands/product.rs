//! `minisuper product ...`

use minisuper_core::{NewProduct, Product, ProductFilter, ProductUpdate};
use tracing::info;

use super::{money, sync_marker};
use crate::cli::{ProductAddArgs, ProductCommand, ProductListArgs, ProductUpdateArgs};
use crate::context::AppContext;
use crate::error::{CliError, CliResult};

pub async fn run(ctx: &AppContext, command: ProductCommand) -> CliResult<()> {
    match command {
        ProductCommand::Add(args) => add(ctx, args).await,
        ProductCommand::Update(args) => update(ctx, args).await,
        ProductCommand::Delete { code } => {
            let product = find_by_code(ctx, &code).await?;
            let product = ctx.db.recorder().delete_product(&product.local_id).await?;
            info!(code = %product.code, "Product deactivated");
            ctx.emit(&product, print_product)
        }
        ProductCommand::Stock { code, delta } => {
            let product = find_by_code(ctx, &code).await?;
            let product = ctx
                .db
                .recorder()
                .adjust_stock(&product.local_id, delta)
                .await?;
            ctx.emit(&product, print_product)
        }
        ProductCommand::Show { code } => {
            let product = find_by_code(ctx, &code).await?;
            ctx.emit(&product, print_product)
        }
        ProductCommand::List(args) => list(ctx, args).await,
    }
}

pub(crate) async fn find_by_code(ctx: &AppContext, code: &str) -> CliResult<Product> {
    ctx.db
        .products()
        .get_by_code(code)
        .await?
        .ok_or_else(|| CliError::not_found("Product", code))
}

async fn add(ctx: &AppContext, args: ProductAddArgs) -> CliResult<()> {
    let input = NewProduct {
        name: args.name,
        code: args.code,
        barcode: args.barcode,
        price_cents: args.price,
        cost_cents: args.cost,
        stock: args.stock,
        min_stock: args.min_stock,
        max_stock: args.max_stock,
        category: args.category,
        brand: args.brand,
        description: args.description,
        unit: args.unit,
        image: None,
    };
    let product = ctx.db.recorder().create_product(input).await?;
    ctx.emit(&product, print_product)
}

async fn update(ctx: &AppContext, args: ProductUpdateArgs) -> CliResult<()> {
    let product = find_by_code(ctx, &args.code).await?;
    let update = ProductUpdate {
        name: args.name,
        code: args.new_code,
        barcode: args.barcode,
        price_cents: args.price,
        cost_cents: args.cost,
        stock: args.stock,
        min_stock: args.min_stock,
        category: args.category,
        brand: args.brand,
        ..Default::default()
    };
    if update.is_empty() {
        return Err(CliError::InvalidArgument("nothing to update".to_string()));
    }
    let product = ctx
        .db
        .recorder()
        .update_product(&product.local_id, update)
        .await?;
    ctx.emit(&product, print_product)
}

async fn list(ctx: &AppContext, args: ProductListArgs) -> CliResult<()> {
    let filter = ProductFilter {
        category: args.category,
        active: if args.all { None } else { Some(true) },
        search: args.search,
        low_stock: args.low_stock,
        limit: args.limit,
    };
    let products = ctx.db.products().list(&filter).await?;
    ctx.emit(&products, |products| {
        for product in products {
            print_product(product);
        }
        println!("{} product(s); * = not yet synced", products.len());
    })
}

fn print_product(product: &Product) {
    let flags = match (product.active, product.is_low_stock()) {
        (false, _) => " [inactive]",
        (true, true) => " [low stock]",
        (true, false) => "",
    };
    println!(
        "{:<12} {:<32} {:>10}  stock {:>5}{}{}",
        product.code,
        product.name,
        money(product.price_cents),
        product.stock,
        flags,
        sync_marker(product.synced)
    );
}
